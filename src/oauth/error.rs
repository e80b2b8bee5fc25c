use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use super::provider::ProviderError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid assertion: {0}")]
    InvalidAssertion(&'static str),
    /// The email belongs to a user linked to another Google identity.
    #[error("email already linked to a different identity (user {user_id})")]
    IdentityConflict { user_id: Uuid },
    #[error("user store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Everything that can end a Google login attempt.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("google login is not configured")]
    NotConfigured,
    #[error("provider returned an error: {0}")]
    Denied(String),
    #[error("missing or invalid oauth state")]
    InvalidState,
    #[error("missing authorization code")]
    MissingCode,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("session issue failed: {0}")]
    Session(String),
}

impl LoginError {
    /// Status and end-user message. Messages never carry internal detail.
    pub fn reject(&self) -> (StatusCode, String) {
        let (status, msg) = match self {
            LoginError::NotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Google login is not configured",
            ),
            LoginError::Denied(_) => (StatusCode::BAD_REQUEST, "Google login was cancelled"),
            LoginError::InvalidState => (StatusCode::BAD_REQUEST, "Login session expired, please try again"),
            LoginError::MissingCode => (StatusCode::BAD_REQUEST, "Missing authorization code"),
            LoginError::Provider(ProviderError::Unavailable(_)) => {
                (StatusCode::BAD_GATEWAY, "Google is unavailable, please try again")
            }
            LoginError::Provider(_) => (StatusCode::UNAUTHORIZED, "Google login failed"),
            LoginError::Reconcile(ReconcileError::InvalidAssertion(_)) => {
                (StatusCode::BAD_REQUEST, "Google login failed")
            }
            LoginError::Reconcile(ReconcileError::IdentityConflict { .. }) => (
                StatusCode::CONFLICT,
                "This email is already linked to a different account",
            ),
            LoginError::Reconcile(ReconcileError::StoreUnavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Login is temporarily unavailable, please try again",
            ),
            LoginError::Session(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Login failed"),
        };
        (status, msg.to_string())
    }
}
