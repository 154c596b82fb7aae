//! API router. Everything lives under `/api/v1`; only `/health` and
//! `/login` are reachable without a bearer token.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;

/// Build the service router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost
/// layer of the protected routes); handlers use `State<ApiContext>`.
pub fn api_router(ctx: ApiContext) -> Router {
    // Layers run bottom-up: Extension → Auth → Audit → Handler.
    let protected = Router::new()
        .route("/analyze-visit-notes", get(endpoints::analysis::analyze_all))
        .route("/analyze-visit-note", get(endpoints::analysis::analyze_one))
        .route(
            "/get-patient/:patient_id",
            get(endpoints::patients::get_patient),
        )
        .route(
            "/get-billing-estimate/:patient_id",
            get(endpoints::patients::get_billing_estimate),
        )
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::Extension(ctx.clone()));

    let unprotected = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/login", post(endpoints::auth::login))
        .with_state(ctx)
        .layer(axum::middleware::from_fn(middleware::audit::log_access));

    Router::new()
        .nest("/api/v1", protected.merge(unprotected))
        .layer(TraceLayer::new_for_http())
}
