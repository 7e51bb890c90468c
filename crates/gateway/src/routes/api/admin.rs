//! Administrative API: hosts, users, bearer tokens.
//!
//! Every handler requires [`RequireAdmin`].

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use portcullis_core::{Host, User, UserId, Username, normalize_hostname, toggle_admin, toggle_host};

use crate::error::AppError;
use crate::middleware::RequireAdmin;
use crate::state::AppState;

/// Build the admin API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/hosts", get(list_hosts).post(add_host))
        .route("/api/admin/hosts/{hostname}", delete(delete_host))
        .route("/api/admin/users", get(list_users))
        .route(
            "/api/admin/users/{username}/hosts/{hostname}",
            post(toggle_user_host),
        )
        .route("/api/admin/users/{username}/admin", post(toggle_user_admin))
        .route("/api/admin/tokens", post(issue_token))
}

// ============================================================================
// Hosts
// ============================================================================

/// GET /api/admin/hosts
#[instrument(skip_all)]
async fn list_hosts(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<Host>>, AppError> {
    let mut hosts = state.registry().list().await?;
    hosts.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    Ok(Json(hosts))
}

/// Add or replace a host.
///
/// POST /api/admin/hosts
#[instrument(skip_all, fields(hostname = %host.hostname))]
async fn add_host(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(host): Json<Host>,
) -> Result<impl IntoResponse, AppError> {
    let host = state.registry().add(host).await?;
    tracing::info!(admin = %admin.name, hostname = %host.hostname, "host saved by administrator");
    Ok((StatusCode::CREATED, Json(host)))
}

/// DELETE /api/admin/hosts/{hostname}
#[instrument(skip_all, fields(%hostname))]
async fn delete_host(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(hostname): Path<String>,
) -> Result<StatusCode, AppError> {
    state.registry().delete(&hostname).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Users
// ============================================================================

/// User listing without credential material.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub name: Username,
    pub registered: bool,
    pub admin: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub credentials: usize,
    pub accessible_hosts: Vec<String>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            registered: user.registered,
            admin: user.admin,
            created_at: user.created_at,
            last_seen: user.last_seen,
            credentials: user.credentials.len(),
            accessible_hosts: user.accessible_hosts,
        }
    }
}

/// GET /api/admin/users
#[instrument(skip_all)]
async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<UserView>>, AppError> {
    let mut users = state.store().list_users().await?;
    users.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(users.into_iter().map(UserView::from).collect()))
}

async fn load_user(state: &AppState, username: &str) -> Result<User, AppError> {
    let name = Username::parse(username).map_err(|e| AppError::BadRequest(e.to_string()))?;
    state
        .store()
        .get_user_by_name(&name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {username}")))
}

#[derive(Debug, Serialize)]
pub struct HostToggleResponse {
    pub username: Username,
    pub hostname: String,
    /// Whether the host is on the user's allow-list after the toggle.
    pub granted: bool,
}

/// Grant the host if absent, revoke it if present.
///
/// POST /api/admin/users/{username}/hosts/{hostname}
#[instrument(skip_all, fields(%username, %hostname))]
async fn toggle_user_host(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path((username, hostname)): Path<(String, String)>,
) -> Result<Json<HostToggleResponse>, AppError> {
    let mut user = load_user(&state, &username).await?;
    let hostname = normalize_hostname(&hostname);
    let granted = toggle_host(&mut user, &hostname);
    state.store().save_user(&user).await?;

    tracing::info!(
        admin = %admin.name,
        user = %user.name,
        %hostname,
        granted,
        "host access toggled"
    );
    Ok(Json(HostToggleResponse {
        username: user.name,
        hostname,
        granted,
    }))
}

#[derive(Debug, Serialize)]
pub struct AdminToggleResponse {
    pub username: Username,
    pub admin: bool,
}

/// POST /api/admin/users/{username}/admin
#[instrument(skip_all, fields(%username))]
async fn toggle_user_admin(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(username): Path<String>,
) -> Result<Json<AdminToggleResponse>, AppError> {
    let mut user = load_user(&state, &username).await?;
    let now_admin = toggle_admin(&mut user);
    state.store().save_user(&user).await?;

    tracing::info!(admin = %admin.name, user = %user.name, now_admin, "admin flag toggled");
    Ok(Json(AdminToggleResponse {
        username: user.name,
        admin: now_admin,
    }))
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub subject: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// POST /api/admin/tokens
#[instrument(skip_all, fields(subject = %req.subject))]
async fn issue_token(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(req): Json<IssueTokenRequest>,
) -> Result<Json<IssueTokenResponse>, AppError> {
    let ttl = match req.ttl_secs {
        Some(secs) => Duration::try_seconds(secs)
            .ok_or_else(|| AppError::BadRequest("ttl_secs out of range".to_string()))?,
        None => state.config().tokens.default_age,
    };
    let issuer = req
        .issuer
        .unwrap_or_else(|| state.config().hostname.clone());

    let now = Utc::now();
    let token = state.tokens().issue_at(&req.subject, &issuer, ttl, now)?;

    tracing::info!(
        admin = %admin.name,
        subject = %req.subject,
        ttl_secs = ttl.num_seconds(),
        "bearer token issued"
    );
    Ok(Json(IssueTokenResponse {
        token,
        expires_at: now + ttl,
    }))
}
