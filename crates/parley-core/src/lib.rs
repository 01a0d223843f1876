//! Parley Core: shared data model, configuration, error taxonomy.

pub mod config;
pub mod error;
pub mod types;

pub use config::{join_url, ParleyConfig, ProviderDefaults};
pub use error::{Error, ErrorClass, Result};
pub use types::*;
