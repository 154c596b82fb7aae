//! API endpoint handlers. Each is a thin shell over a `CodingPipeline`
//! operation.

pub mod analysis;
pub mod auth;
pub mod health;
pub mod patients;
