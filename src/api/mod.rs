//! HTTP surface over the coding pipeline.
//!
//! Routes are nested under `/api/v1/`. Everything except health and login
//! sits behind bearer-token auth and the audit logger.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer};
pub use types::ApiContext;
