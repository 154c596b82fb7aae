//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Auth validator
//! 2. Audit logger, which sees the authenticated caller

pub mod audit;
pub mod auth;
