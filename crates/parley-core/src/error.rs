//! Error types for Parley.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A model backend is misconfigured or could not be constructed.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    /// Search against a collection that has never been written to.
    #[error("Collection is empty: {0}")]
    EmptyCollection(String),

    #[error("Chunking configuration error: {0}")]
    ChunkingConfig(String),

    /// The consumer of a stream went away.
    #[error("Stream aborted")]
    StreamAborted,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Communication with a model or store backend failed after construction.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse grouping used by callers to tell malformed requests apart from
/// unhealthy backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Backend,
    NonFatal,
    Aborted,
    Internal,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::ChunkingConfig(_) | Error::InvalidRequest(_) | Error::Config(_) => {
                ErrorClass::Validation
            }
            Error::ProviderUnavailable(_) | Error::StoreUnavailable(_) | Error::Backend(_) => {
                ErrorClass::Backend
            }
            Error::EmptyCollection(_) => ErrorClass::NonFatal,
            Error::StreamAborted => ErrorClass::Aborted,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Short machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ProviderUnavailable(_) => "provider_unavailable",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::EmptyCollection(_) => "empty_collection",
            Error::ChunkingConfig(_) => "chunking_config",
            Error::StreamAborted => "stream_aborted",
            Error::InvalidRequest(_) => "bad_request",
            Error::Backend(_) => "backend_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Config(_) => "config_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_and_backend_are_distinct() {
        assert_eq!(
            Error::ChunkingConfig("overlap".into()).class(),
            ErrorClass::Validation
        );
        assert_eq!(
            Error::ProviderUnavailable("down".into()).class(),
            ErrorClass::Backend
        );
        assert_eq!(
            Error::StoreUnavailable("down".into()).class(),
            ErrorClass::Backend
        );
        assert_eq!(
            Error::EmptyCollection("default".into()).class(),
            ErrorClass::NonFatal
        );
        assert_eq!(Error::StreamAborted.class(), ErrorClass::Aborted);
    }
}
