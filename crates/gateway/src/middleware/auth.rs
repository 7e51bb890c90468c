//! Caller identity: session binding, bearer tokens, and the admin guard.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};

use portcullis_core::{Session, User};

use super::session::{TOKEN_COOKIE_NAME, read_cookie};
use crate::error::{AppError, set_sentry_user};
use crate::state::AppState;
use crate::store::DynStore;

/// The bearer token presented with a request, from the token cookie or an
/// `Authorization: Bearer` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = read_cookie(headers, TOKEN_COOKIE_NAME) {
        return Some(token);
    }
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// The user an authenticated session is bound to.
///
/// A dangling reference (the user was removed) reads as `None`, the same as
/// an unauthenticated session.
///
/// # Errors
///
/// Returns `AppError::Store` on store failure.
pub async fn resolve_user(store: &DynStore, session: &Session) -> Result<Option<User>, AppError> {
    if !session.is_authenticated() {
        return Ok(None);
    }
    let Some(user_id) = session.user_id else {
        return Ok(None);
    };
    let user = store.get_user(user_id).await?;
    if user.is_none() {
        tracing::warn!(%user_id, "session bound to a user that no longer exists");
    }
    Ok(user)
}

/// Extractor that requires an authenticated administrator.
///
/// Rejects with 401 when the session is not authenticated and 403 when the
/// user is not an administrator.
///
/// # Example
///
/// ```rust,ignore
/// async fn list_hosts(RequireAdmin(admin): RequireAdmin) -> impl IntoResponse {
///     format!("Hello, {}!", admin.name)
/// }
/// ```
pub struct RequireAdmin(pub User);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .ok_or_else(|| AppError::Unauthorized("no session".to_string()))?;

        let user = resolve_user(state.store(), session)
            .await?
            .ok_or_else(|| AppError::Unauthorized("not logged in".to_string()))?;

        if !user.admin {
            tracing::debug!(user = %user.name, "admin endpoint refused");
            return Err(AppError::Forbidden(
                "administrator access required".to_string(),
            ));
        }

        set_sentry_user(user.id, user.name.as_str());
        Ok(Self(user))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;
    use axum::http::header::COOKIE;

    use super::*;

    #[test]
    fn test_bearer_from_authorization_header() {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer pc1.local.abc.def"));
        assert_eq!(bearer_token(&h).as_deref(), Some("pc1.local.abc.def"));
    }

    #[test]
    fn test_bearer_cookie_wins_over_header() {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        h.insert(COOKIE, HeaderValue::from_static("portcullis_token=from-cookie"));
        assert_eq!(bearer_token(&h).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_bearer_rejects_other_schemes() {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&h), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
