//! HTTP middleware and extractors for the gateway.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. `TraceLayer` (request tracing)
//! 3. Host dispatch (gateway hostname vs. internal proxy)
//! 4. Session layer on the gateway's own routes, except health checks

pub mod auth;
pub mod session;

pub use auth::{RequireAdmin, bearer_token, resolve_user};
pub use session::{
    CurrentSession, SESSION_COOKIE_NAME, TOKEN_COOKIE_NAME, clear_cookie, read_cookie,
    refresh_session_cookie, session_cookie, session_layer, token_cookie,
};
