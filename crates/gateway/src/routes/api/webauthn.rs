//! Passkey ceremony API.
//!
//! Challenge options go to the browser and credential responses come back
//! in the ceremony library's native JSON; nothing here reshapes them.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use portcullis_core::SessionState;

use crate::error::AppError;
use crate::middleware::{
    CurrentSession, SESSION_COOKIE_NAME, TOKEN_COOKIE_NAME, clear_cookie, resolve_user,
};
use crate::state::AppState;

/// Build the ceremony API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register/start", post(start_registration))
        .route("/api/auth/register/finish", post(finish_registration))
        .route("/api/auth/login/start", post(start_login))
        .route("/api/auth/login/finish", post(finish_login))
        .route("/api/auth/passkeys/start", post(start_add_passkey))
        .route("/api/auth/passkeys/finish", post(finish_add_passkey))
        .route("/api/auth/logout", post(logout))
        .route("/api/me", get(me))
}

/// Plain acknowledgement.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// ============================================================================
// Registration
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRegistrationRequest {
    pub username: String,
}

/// POST /api/auth/register/start
async fn start_registration(
    State(state): State<AppState>,
    CurrentSession(mut session): CurrentSession,
    Json(req): Json<StartRegistrationRequest>,
) -> Result<Json<Value>, AppError> {
    let options = state
        .ceremonies()
        .start_registration(&mut session, &req.username)
        .await?;
    Ok(Json(options))
}

/// POST /api/auth/register/finish
async fn finish_registration(
    State(state): State<AppState>,
    CurrentSession(mut session): CurrentSession,
    Json(credential): Json<Value>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .ceremonies()
        .finish_registration(&mut session, &credential)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================================
// Login
// ============================================================================

/// Omit the username for a discoverable login.
#[derive(Debug, Default, Deserialize)]
pub struct StartLoginRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FinishLoginResponse {
    pub success: bool,
    /// Where the caller was headed before being sent to log in.
    pub redirect: Option<String>,
}

/// POST /api/auth/login/start
async fn start_login(
    State(state): State<AppState>,
    CurrentSession(mut session): CurrentSession,
    Json(req): Json<StartLoginRequest>,
) -> Result<Json<Value>, AppError> {
    let options = state
        .ceremonies()
        .start_login(&mut session, req.username.as_deref())
        .await?;
    Ok(Json(options))
}

/// POST /api/auth/login/finish
async fn finish_login(
    State(state): State<AppState>,
    CurrentSession(mut session): CurrentSession,
    Json(assertion): Json<Value>,
) -> Result<Json<FinishLoginResponse>, AppError> {
    let outcome = state
        .ceremonies()
        .finish_login(&mut session, &assertion)
        .await?;
    Ok(Json(FinishLoginResponse {
        success: true,
        redirect: outcome.redirect,
    }))
}

// ============================================================================
// Additional passkeys (requires authentication)
// ============================================================================

/// POST /api/auth/passkeys/start
async fn start_add_passkey(
    State(state): State<AppState>,
    CurrentSession(mut session): CurrentSession,
) -> Result<Json<Value>, AppError> {
    let options = state.ceremonies().start_add_credential(&mut session).await?;
    Ok(Json(options))
}

/// POST /api/auth/passkeys/finish
async fn finish_add_passkey(
    State(state): State<AppState>,
    CurrentSession(mut session): CurrentSession,
    Json(credential): Json<Value>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .ceremonies()
        .finish_add_credential(&mut session, &credential)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================================
// Session
// ============================================================================

/// Force-expire the session and clear both gateway cookies.
///
/// POST /api/auth/logout
async fn logout(
    State(state): State<AppState>,
    CurrentSession(mut session): CurrentSession,
) -> Result<Response, AppError> {
    state.ceremonies().logout(&mut session).await?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    for name in [SESSION_COOKIE_NAME, TOKEN_COOKIE_NAME] {
        let cookie = clear_cookie(state.config(), name)
            .map_err(|e| AppError::Internal(format!("failed to build cookie: {e}")))?;
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub state: SessionState,
    pub username: Option<String>,
    pub admin: bool,
}

/// GET /api/me
async fn me(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<MeResponse>, AppError> {
    let user = resolve_user(state.store(), &session).await?;
    Ok(Json(MeResponse {
        state: session.state,
        admin: user.as_ref().is_some_and(|u| u.admin),
        username: user.map(|u| u.name.into_inner()),
    }))
}
