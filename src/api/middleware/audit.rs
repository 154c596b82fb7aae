//! Audit logging middleware.
//!
//! Logs every API request with caller identity, method, path and response
//! status. Runs innermost, after auth has injected `CallerContext`. Query
//! strings are not logged.

use std::time::Instant;

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::api::types::CallerContext;

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let caller = req
        .extensions()
        .get::<CallerContext>()
        .map(|c| c.identity.clone())
        .unwrap_or_else(|| "anonymous".into());
    let request_id = Uuid::new_v4();
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        %request_id,
        caller = %caller,
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "API access"
    );
    response
}
