//! Forward-auth endpoint and the access decision shared with the internal
//! proxy.
//!
//! An external reverse proxy calls `GET /verify` with the original request's
//! host, scheme and path in `X-Forwarded-*` headers and the caller's cookies.
//! The answer is `200` (let it through) or `307` to the login surface with
//! the target repeated in `X-Portcullis-Redirect`.

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};

use portcullis_core::{
    Host, REDIRECT_TO_KEY, Session, User, Username, can_access, normalize_hostname,
    within_cookie_scope,
};

use crate::error::AppError;
use crate::middleware::{
    CurrentSession, TOKEN_COOKIE_NAME, bearer_token, clear_cookie, resolve_user,
};
use crate::state::AppState;

/// Response header repeating the redirect target for proxy-aware clients.
pub const REDIRECT_HEADER: HeaderName = HeaderName::from_static("x-portcullis-redirect");

const FORWARDED_HOST: &str = "x-forwarded-host";
const FORWARDED_PROTO: &str = "x-forwarded-proto";
const FORWARDED_URI: &str = "x-forwarded-uri";

pub fn router() -> Router<AppState> {
    Router::new().route("/verify", get(verify))
}

/// Outcome of an access check.
#[derive(Debug)]
pub enum Decision {
    /// Let the request through. `user` is `None` for anonymous callers on
    /// public hosts.
    Allow { user: Option<User> },
    /// Send the caller to the login surface.
    Deny {
        /// Whether the caller is known (session or token) but not entitled.
        identified: bool,
        /// A bearer token was presented and rejected.
        clear_token: bool,
    },
}

/// Decide whether the caller may reach `host`.
///
/// The session is consulted first. An unauthenticated session falls back to
/// a bearer token; a rejected token is logged and treated as no identity.
///
/// # Errors
///
/// Returns `AppError` on store failure or a local token-codec failure.
pub async fn authorize(
    state: &AppState,
    session: &Session,
    headers: &HeaderMap,
    host: &Host,
) -> Result<Decision, AppError> {
    let mut user = resolve_user(state.store(), session).await?;
    let mut clear_token = false;

    if user.is_none()
        && let Some(token) = bearer_token(headers)
    {
        match user_from_token(state, &token).await {
            Ok(found) => {
                clear_token = found.is_none();
                user = found;
            }
            Err(AppError::Token(e)) if e.is_rejection() => {
                tracing::warn!(error = %e, hostname = %host.hostname, "bearer token rejected");
                clear_token = true;
            }
            Err(e) => return Err(e),
        }
    }

    if can_access(user.as_ref(), host) {
        return Ok(Decision::Allow { user });
    }

    tracing::debug!(
        hostname = %host.hostname,
        user = user.as_ref().map(|u| u.name.as_str()),
        "access denied"
    );
    Ok(Decision::Deny {
        identified: user.is_some(),
        clear_token,
    })
}

async fn user_from_token(state: &AppState, token: &str) -> Result<Option<User>, AppError> {
    let claims = state.tokens().validate(token)?;
    let Ok(name) = Username::parse(&claims.sub) else {
        tracing::warn!(subject = %claims.sub, "bearer token subject is not a username");
        return Ok(None);
    };
    let user = state
        .store()
        .get_user_by_name(&name)
        .await?
        .filter(User::is_login_target);
    if user.is_none() {
        tracing::warn!(subject = %claims.sub, "bearer token subject has no account");
    }
    Ok(user)
}

/// Remember where an unauthenticated caller was going, so login can send
/// them back. Targets outside the cookie scope are not remembered.
///
/// # Errors
///
/// Returns `AppError::Store` if the session cannot be saved.
pub async fn stash_target(
    state: &AppState,
    session: &mut Session,
    hostname: &str,
    target: String,
) -> Result<(), AppError> {
    if !within_cookie_scope(hostname, &state.config().cookie_scope) {
        tracing::debug!(%hostname, "not remembering a target outside the cookie scope");
        return Ok(());
    }
    session.values.insert(REDIRECT_TO_KEY.to_string(), target);
    state.store().save_session(session).await?;
    Ok(())
}

/// `307` to the login surface.
#[must_use]
pub fn login_redirect(state: &AppState, clear_token: bool) -> Response {
    let login = state.config().login_url();
    let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();

    match HeaderValue::from_str(&login) {
        Ok(value) => {
            let headers = response.headers_mut();
            headers.insert(header::LOCATION, value.clone());
            headers.insert(REDIRECT_HEADER, value);
        }
        Err(e) => {
            tracing::error!(error = %e, "login url is not a valid header value");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    if clear_token {
        match clear_cookie(state.config(), TOKEN_COOKIE_NAME) {
            Ok(cookie) => {
                response.headers_mut().append(header::SET_COOKIE, cookie);
            }
            Err(e) => tracing::error!(error = %e, "failed to build token-clearing cookie"),
        }
    }

    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Forward-auth check.
///
/// GET /verify
///
/// The gateway's own hostname is always allowed. Any other well-formed
/// hostname inside the cookie scope is recorded in the registry, whatever
/// the outcome; a malformed one is a bad request.
async fn verify(
    State(state): State<AppState>,
    CurrentSession(mut session): CurrentSession,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let raw_host = header_str(&headers, FORWARDED_HOST)
        .ok_or_else(|| AppError::BadRequest("missing X-Forwarded-Host".to_string()))?;
    let hostname = normalize_hostname(raw_host);
    let proto = header_str(&headers, FORWARDED_PROTO).unwrap_or("https");
    let uri = header_str(&headers, FORWARDED_URI).unwrap_or("/");

    if hostname == state.config().hostname {
        return Ok(StatusCode::OK.into_response());
    }

    let host = state.registry().ensure_known(&hostname).await?;

    match authorize(&state, &session, &headers, &host).await? {
        Decision::Allow { .. } => Ok(StatusCode::OK.into_response()),
        Decision::Deny {
            identified: false,
            clear_token,
        } => {
            let target = format!("{proto}://{hostname}{uri}");
            stash_target(&state, &mut session, &hostname, target).await?;
            Ok(login_redirect(&state, clear_token))
        }
        Decision::Deny { clear_token, .. } => Ok(login_redirect(&state, clear_token)),
    }
}
