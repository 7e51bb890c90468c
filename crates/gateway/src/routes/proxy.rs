//! Internal proxy mode: requests for any hostname other than the gateway's
//! own are checked and forwarded to the registered backend.
//!
//! Unknown hostnames get 404 before a session is touched. Known ones load
//! the caller's session here, since the session layer only wraps the
//! gateway's own routes.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use portcullis_core::{Session, normalize_hostname};

use super::forward_auth::{Decision, authorize, login_redirect, stash_target};
use crate::error::AppError;
use crate::middleware::session::{
    COOKIE_PREFIX, SESSION_COOKIE_NAME, read_cookie, refresh_session_cookie,
};
use crate::services::Route;
use crate::state::AppState;

const USER_HEADER: HeaderName = HeaderName::from_static("x-portcullis-user");
const FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const ORIGIN_HOST: HeaderName = HeaderName::from_static("x-origin-host");

/// The hostname a request was addressed to.
#[must_use]
pub fn request_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().host())
        .map(normalize_hostname)
}

/// Route requests for proxied hostnames away from the gateway's own routes.
pub async fn dispatch(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(hostname) = request_host(&request) else {
        return next.run(request).await;
    };
    if hostname == state.config().hostname {
        return next.run(request).await;
    }

    let table = state.router().snapshot();
    let Some(route) = table.get(&hostname) else {
        return AppError::NotFound(hostname).into_response();
    };

    let cookie = read_cookie(request.headers(), SESSION_COOKIE_NAME);
    let session = match state.sessions().get_or_create(cookie.as_deref()).await {
        Ok(session) => session,
        Err(e) => return AppError::from(e).into_response(),
    };
    let id = session.id.clone();

    let mut response = match proxy(&state, route, &hostname, session, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    refresh_session_cookie(state.config(), &mut response, &id);
    response
}

async fn proxy(
    state: &AppState,
    route: &Route,
    hostname: &str,
    mut session: Session,
    request: Request,
) -> Result<Response, AppError> {
    match authorize(state, &session, request.headers(), &route.host).await? {
        Decision::Allow { user } => {
            let username = user.as_ref().map(|u| u.name.as_str());
            forward(state, route, hostname, username, request).await
        }
        Decision::Deny {
            identified: false,
            clear_token,
        } => {
            let path = request
                .uri()
                .path_and_query()
                .map_or("/", |pq| pq.as_str());
            let target = format!("https://{hostname}{path}");
            stash_target(state, &mut session, hostname, target).await?;
            Ok(login_redirect(state, clear_token))
        }
        Decision::Deny { clear_token, .. } => Ok(login_redirect(state, clear_token)),
    }
}

/// Rebuild the `Cookie` header without the gateway's own cookies.
fn strip_gateway_cookies(headers: &mut HeaderMap) {
    let kept: Vec<String> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty() && !pair.starts_with(COOKIE_PREFIX))
        .map(str::to_owned)
        .collect();

    headers.remove(header::COOKIE);
    if kept.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&kept.join("; ")) {
        headers.insert(header::COOKIE, value);
    }
}

/// Hop-by-hop headers are not forwarded in either direction.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
}

/// Headers sent to the backend.
fn upstream_headers(
    original: &HeaderMap,
    hostname: &str,
    username: Option<&str>,
) -> Result<HeaderMap, AppError> {
    let mut headers = original.clone();
    strip_hop_by_hop(&mut headers);
    strip_gateway_cookies(&mut headers);
    headers.remove(header::HOST);

    let origin = HeaderValue::from_str(hostname)
        .map_err(|e| AppError::BadRequest(format!("invalid host: {e}")))?;
    headers.insert(FORWARDED_HOST, origin.clone());
    headers.insert(ORIGIN_HOST, origin);
    headers.remove(USER_HEADER);
    if let Some(username) = username {
        headers.insert(
            USER_HEADER,
            HeaderValue::from_str(username)
                .map_err(|e| AppError::Internal(format!("username is not a header value: {e}")))?,
        );
    }
    Ok(headers)
}

async fn forward(
    state: &AppState,
    route: &Route,
    hostname: &str,
    username: Option<&str>,
    request: Request,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = format!("{}{path}", route.backend.as_str().trim_end_matches('/'));
    let headers = upstream_headers(&parts.headers, hostname, username)?;

    let upstream = state
        .http()
        .request(parts.method, &url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(
                error = %e,
                %hostname,
                backend = %route.backend,
                "backend request failed"
            );
            AppError::BadGateway(e.to_string())
        })?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
