use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error};
use uuid::Uuid;

use super::email::normalize_email;
use super::model::{User, USER_COLUMNS};
use super::store::{StoreError, UserStore};

/// PostgreSQL-backed user store. Uniqueness comes from the `users_email_lower_key`
/// and `users_google_id_key` indexes. Emails are normalized before every write.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_sqlx(op: &'static str, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            debug!(op, %constraint, "unique violation");
            return StoreError::Duplicate { constraint };
        }
    }
    error!(op, error = %e, "user store query failed");
    StoreError::Unavailable(format!("{op}: {e}"))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_sqlx("find_by_id", e))
    }

    async fn find_by_provider_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE google_id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(google_id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_sqlx("find_by_provider_id", e))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(normalize_email(email))
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_sqlx("find_by_email", e))
    }

    async fn insert_password_user(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(normalize_email(email))
            .bind(password_hash)
            .fetch_one(&self.db)
            .await
            .map_err(|e| map_sqlx("insert_password_user", e))
    }

    async fn insert_federated_user(
        &self,
        email: &str,
        google_id: &str,
        profile_image: Option<&str>,
    ) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (email, google_id, profile_image)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(normalize_email(email))
            .bind(google_id)
            .bind(profile_image)
            .fetch_one(&self.db)
            .await
            .map_err(|e| map_sqlx("insert_federated_user", e))
    }

    async fn link_provider_id(
        &self,
        user_id: Uuid,
        google_id: &str,
        profile_image: Option<&str>,
    ) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET google_id = $2,
                   profile_image = COALESCE(profile_image, $3),
                   updated_at = now()
             WHERE id = $1 AND google_id IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(google_id)
            .bind(profile_image)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_sqlx("link_provider_id", e))?;

        match updated {
            Some(user) => Ok(user),
            None => match self.find_by_id(user_id).await? {
                Some(_) => Err(StoreError::LinkRaced(user_id)),
                None => Err(StoreError::NotFound(user_id)),
            },
        }
    }

    async fn set_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET password_hash = $2,
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(password_hash)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_sqlx("set_password_hash", e))?
            .ok_or(StoreError::NotFound(user_id))
    }
}
