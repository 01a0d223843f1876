//! Parley HTTP server: chat, RAG and model catalog routes.

pub mod error;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
