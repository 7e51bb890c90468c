//! Login surface.

use askama::Template;
use axum::{
    Router,
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
};

use crate::error::AppError;
use crate::middleware::{CurrentSession, resolve_user};
use crate::state::AppState;

/// Login / registration page template.
#[derive(Template)]
#[template(path = "login.html")]
struct LoginPageTemplate {
    display_name: String,
    username: Option<String>,
    admin: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(login_page))
}

/// Render the login page, or the signed-in view for an authenticated
/// session.
///
/// GET /
async fn login_page(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<impl IntoResponse, AppError> {
    let user = resolve_user(state.store(), &session).await?;
    let template = LoginPageTemplate {
        display_name: state.config().display_name.clone(),
        admin: user.as_ref().is_some_and(|u| u.admin),
        username: user.map(|u| u.name.into_inner()),
    };
    Ok(Html(
        template
            .render()
            .unwrap_or_else(|_| String::from("Error rendering template")),
    ))
}
