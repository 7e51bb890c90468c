//! Unified error handling for the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use portcullis_core::{GlobError, HostError, UserId};

use crate::services::ceremony::CeremonyError;
use crate::services::registry::RegistryError;
use crate::services::token::TokenError;
use crate::store::StoreError;

/// Application-level error type for gateway handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Passkey ceremony failed.
    #[error("Ceremony error: {0}")]
    Ceremony(#[from] CeremonyError),

    /// Bearer token operation failed.
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Host configuration rejected.
    #[error("Invalid host: {0}")]
    Host(#[from] HostError),

    /// Backend could not be reached or answered badly.
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks permission.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Invalid(e) => Self::Host(e),
            RegistryError::Store(e) => Self::Store(e),
        }
    }
}

impl From<GlobError> for AppError {
    fn from(e: GlobError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl AppError {
    /// HTTP status this error maps to.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Store(StoreError::NotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Ceremony(CeremonyError::VerificationFailed(_)) => StatusCode::FORBIDDEN,
            Self::Ceremony(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Ceremony(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Token(e) if e.is_rejection() => StatusCode::UNAUTHORIZED,
            Self::Token(TokenError::TtlTooLong { .. } | TokenError::InvalidTtl) => {
                StatusCode::BAD_REQUEST
            }
            Self::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Host(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Gateway request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            StatusCode::BAD_GATEWAY => "Bad gateway".to_string(),
            StatusCode::FORBIDDEN if matches!(self, Self::Ceremony(_)) => {
                "Verification failed".to_string()
            }
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}

/// Set the Sentry user context for the authenticated caller.
pub fn set_sentry_user(user_id: UserId, username: &str) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            username: Some(username.to_string()),
            ..Default::default()
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::{SessionEvent, SessionState, TransitionError};

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("app.example.com".to_string());
        assert_eq!(err.to_string(), "Not found: app.example.com");

        let err = AppError::BadRequest("missing X-Forwarded-Host".to_string());
        assert_eq!(err.to_string(), "Bad request: missing X-Forwarded-Host");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::Forbidden("test".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(AppError::BadGateway("test".to_string())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_ceremony_errors_map_to_client_or_forbidden() {
        let wrong_state = CeremonyError::WrongState(TransitionError {
            event: SessionEvent::FinishRegistration,
            from: SessionState::Null,
        });
        assert_eq!(get_status(wrong_state.into()), StatusCode::BAD_REQUEST);
        assert_eq!(
            get_status(CeremonyError::UserExists.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(CeremonyError::VerificationFailed("nope".into()).into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(CeremonyError::Provider("boom".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_errors() {
        assert_eq!(get_status(StoreError::NotFound.into()), StatusCode::NOT_FOUND);
        assert_eq!(
            get_status(StoreError::Conflict("dup".into()).into()),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_token_errors() {
        assert_eq!(
            get_status(TokenError::Expired.into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(TokenError::InvalidTtl.into()),
            StatusCode::BAD_REQUEST
        );
    }
}
