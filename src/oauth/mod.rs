//! Google sign-in: provider adapter, identity reconciliation and the callback flow.

pub mod assertion;
pub mod error;
pub mod handlers;
pub mod provider;
pub mod reconciler;

use crate::state::AppState;
use axum::Router;

pub use provider::{CredentialProvider, GoogleProvider};
pub use reconciler::IdentityReconciler;

pub fn router() -> Router<AppState> {
    handlers::google_routes()
}
