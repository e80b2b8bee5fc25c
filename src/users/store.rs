use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::model::User;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {constraint}")]
    Duplicate { constraint: String },
    /// The row's `google_id` was no longer NULL when the link was applied.
    #[error("user {0} is already linked to a provider identity")]
    LinkRaced(Uuid),
    #[error("user {0} not found")]
    NotFound(Uuid),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_race(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. } | StoreError::LinkRaced(_))
    }
}

/// Persistence primitives for user accounts. Every write enforces the email and
/// `google_id` uniqueness at the storage layer.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_provider_id(&self, google_id: &str) -> Result<Option<User>, StoreError>;

    /// Matches case-insensitively. Inserts store the normalized form.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn insert_password_user(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError>;

    async fn insert_federated_user(
        &self,
        email: &str,
        google_id: &str,
        profile_image: Option<&str>,
    ) -> Result<User, StoreError>;

    /// Sets `google_id` on a row whose `google_id` is still NULL. Fails with
    /// `LinkRaced` otherwise. `profile_image` only fills an empty column.
    async fn link_provider_id(
        &self,
        user_id: Uuid,
        google_id: &str,
        profile_image: Option<&str>,
    ) -> Result<User, StoreError>;

    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str)
        -> Result<User, StoreError>;
}
