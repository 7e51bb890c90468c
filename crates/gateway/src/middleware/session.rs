//! Session middleware and cookie handling.
//!
//! Every request gets a session: the layer resolves the session cookie
//! through [`SessionManager::get_or_create`](crate::services::SessionManager::get_or_create),
//! stores the result in the request extensions and re-issues the cookie on
//! the way out so the browser's expiry slides along with the server's.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{
        HeaderMap, HeaderValue,
        header::{COOKIE, InvalidHeaderValue, SET_COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use chrono::Duration;

use portcullis_core::{Session, SessionId};

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::state::AppState;

/// Cookie holding the opaque session id.
pub const SESSION_COOKIE_NAME: &str = "portcullis_session";

/// Cookie holding an encrypted bearer token.
pub const TOKEN_COOKIE_NAME: &str = "portcullis_token";

/// Prefix shared by every cookie the gateway sets.
pub const COOKIE_PREFIX: &str = "portcullis_";

/// Find `name` in the request's `Cookie` headers.
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn build_cookie(
    config: &GatewayConfig,
    name: &str,
    value: &str,
    max_age: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{name}={value}; Domain={}; Path=/; Max-Age={max_age}; Secure; HttpOnly; SameSite=Lax",
        config.cookie_scope
    ))
}

/// `Set-Cookie` value for the session id, valid for one session lifetime.
///
/// # Errors
///
/// Returns `InvalidHeaderValue` if the id or scope contain illegal bytes.
pub fn session_cookie(config: &GatewayConfig, id: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(
        config,
        SESSION_COOKIE_NAME,
        id,
        config.session_lifetime.num_seconds(),
    )
}

/// `Set-Cookie` value carrying a bearer token.
///
/// # Errors
///
/// Returns `InvalidHeaderValue` if the token or scope contain illegal bytes.
pub fn token_cookie(
    config: &GatewayConfig,
    token: &str,
    ttl: Duration,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(config, TOKEN_COOKIE_NAME, token, ttl.num_seconds())
}

/// `Set-Cookie` value that deletes `name`.
///
/// # Errors
///
/// Returns `InvalidHeaderValue` if the scope contains illegal bytes.
pub fn clear_cookie(config: &GatewayConfig, name: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(config, name, "", 0)
}

fn sets_cookie(response: &Response, name: &str) -> bool {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .any(|h| h.starts_with(&prefix))
}

/// Re-issue the session cookie unless the response already sets one.
///
/// Handlers that replace the session cookie themselves (logout) win.
pub fn refresh_session_cookie(config: &GatewayConfig, response: &mut Response, id: &SessionId) {
    if sets_cookie(response, SESSION_COOKIE_NAME) {
        return;
    }
    match session_cookie(config, id.as_str()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "failed to build session cookie"),
    }
}

/// Resolve the caller's session and keep its cookie fresh.
///
/// # Errors
///
/// Returns `AppError::Store` if the session cannot be loaded or saved.
pub async fn session_layer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cookie = read_cookie(request.headers(), SESSION_COOKIE_NAME);
    let session = state.sessions().get_or_create(cookie.as_deref()).await?;
    let id = session.id.clone();
    request.extensions_mut().insert(session);

    let mut response = next.run(request).await;
    refresh_session_cookie(state.config(), &mut response, &id);
    Ok(response)
}

/// The caller's session as loaded by [`session_layer`].
///
/// This is a snapshot: handlers that change the session persist it through
/// the store (or a service that does) before responding.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AppError::Internal("session layer not installed".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn headers(cookie: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        h
    }

    #[test]
    fn test_read_cookie_finds_named_value() {
        let h = headers("theme=dark; portcullis_session=abc123; other=1");
        assert_eq!(
            read_cookie(&h, SESSION_COOKIE_NAME).as_deref(),
            Some("abc123")
        );
        assert_eq!(read_cookie(&h, TOKEN_COOKIE_NAME), None);
    }

    #[test]
    fn test_read_cookie_ignores_empty_values() {
        let h = headers("portcullis_session=");
        assert_eq!(read_cookie(&h, SESSION_COOKIE_NAME), None);
    }

    #[test]
    fn test_read_cookie_across_multiple_headers() {
        let mut h = headers("a=1");
        h.append(COOKIE, HeaderValue::from_static("portcullis_token=tok"));
        assert_eq!(read_cookie(&h, TOKEN_COOKIE_NAME).as_deref(), Some("tok"));
    }
}
