//! HTTP route handlers for the gateway.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                   - Liveness
//! GET  /health/ready                             - Readiness (store reachable)
//!
//! # Login surface
//! GET  /                                         - Login / registration page
//! GET  /static/*                                 - Page assets
//!
//! # Forward-auth
//! GET  /verify                                   - Allow (200) or redirect (307)
//!
//! # Ceremonies
//! POST /api/auth/register/start                  - Registration challenge
//! POST /api/auth/register/finish                 - Registration credential
//! POST /api/auth/login/start                     - Login challenge (named or discoverable)
//! POST /api/auth/login/finish                    - Login assertion
//! POST /api/auth/passkeys/start                  - Additional passkey challenge
//! POST /api/auth/passkeys/finish                 - Additional passkey credential
//! POST /api/auth/logout                          - Force-expire the session
//! GET  /api/me                                   - Session state and user
//!
//! # Administration (administrators only)
//! GET    /api/admin/hosts                        - List hosts
//! POST   /api/admin/hosts                        - Add or replace a host
//! DELETE /api/admin/hosts/{hostname}             - Delete a host
//! GET    /api/admin/users                        - List users
//! POST   /api/admin/users/{username}/hosts/{hostname} - Toggle host access
//! POST   /api/admin/users/{username}/admin       - Toggle administrator
//! POST   /api/admin/tokens                       - Issue a bearer token
//! ```
//!
//! Any other `Host` is served by the internal proxy (see [`proxy`]).

pub mod api;
pub mod forward_auth;
pub mod pages;
pub mod proxy;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::get,
};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::middleware::session_layer;
use crate::state::AppState;

/// Build the complete application.
pub fn app(state: AppState) -> Router {
    let gateway = Router::new()
        .merge(pages::router())
        .merge(forward_auth::router())
        .merge(api::router())
        .nest_service("/static", ServeDir::new(&state.config().static_dir))
        .fallback(not_found)
        .layer(from_fn_with_state(state.clone(), session_layer));

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(gateway)
        .layer(from_fn_with_state(state.clone(), proxy::dispatch))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        host = request
                            .headers()
                            .get(axum::http::header::HOST)
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or_default(),
                        uri = %request.uri(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the store is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
