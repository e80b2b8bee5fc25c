use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String, // trimmed, lower-cased
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // Argon2 hash, None for Google-only accounts
    pub google_id: Option<String>,     // Google `sub`
    pub profile_image: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn is_google_linked(&self) -> bool {
        self.google_id.is_some()
    }
}

/// Column list shared by every query returning a `User`.
pub(crate) const USER_COLUMNS: &str =
    "id, email, password_hash, google_id, profile_image, created_at, updated_at";
