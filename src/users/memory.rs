use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::email::normalize_email;
use super::model::User;
use super::store::{StoreError, UserStore};

/// In-process store with the same uniqueness rules as the `users` table.
/// Lookups yield before taking the lock so concurrent resolutions interleave.
#[derive(Default)]
pub struct MemoryUserStore {
    rows: Mutex<Vec<User>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a row directly, bypassing the write counter.
    pub async fn seed(&self, email: &str, password_hash: Option<&str>, google_id: Option<&str>) -> User {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.map(str::to_string),
            google_id: google_id.map(str::to_string),
            profile_image: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().await.push(user.clone());
        user
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Vec<User> {
        self.rows.lock().await.clone()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    fn check_unique(rows: &[User], email: &str, google_id: Option<&str>) -> Result<(), StoreError> {
        if rows.iter().any(|u| u.email.to_lowercase() == email.to_lowercase()) {
            return Err(StoreError::Duplicate {
                constraint: "users_email_lower_key".into(),
            });
        }
        if let Some(gid) = google_id {
            if rows.iter().any(|u| u.google_id.as_deref() == Some(gid)) {
                return Err(StoreError::Duplicate {
                    constraint: "users_google_id_key".into(),
                });
            }
        }
        Ok(())
    }

    async fn find_where(&self, pred: impl Fn(&User) -> bool) -> Result<Option<User>, StoreError> {
        self.check_up()?;
        tokio::task::yield_now().await;
        Ok(self.rows.lock().await.iter().find(|u| pred(*u)).cloned())
    }

    async fn insert(&self, user: User) -> Result<User, StoreError> {
        self.check_up()?;
        let mut rows = self.rows.lock().await;
        Self::check_unique(&rows, &user.email, user.google_id.as_deref())?;
        rows.push(user.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(user)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.id == id).await
    }

    async fn find_by_provider_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.google_id.as_deref() == Some(google_id)).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        self.find_where(|u| u.email.to_lowercase() == email).await
    }

    async fn insert_password_user(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let now = OffsetDateTime::now_utc();
        self.insert(User {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash: Some(password_hash.to_string()),
            google_id: None,
            profile_image: None,
            created_at: now,
            updated_at: now,
        })
        .await
    }

    async fn insert_federated_user(
        &self,
        email: &str,
        google_id: &str,
        profile_image: Option<&str>,
    ) -> Result<User, StoreError> {
        let now = OffsetDateTime::now_utc();
        self.insert(User {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash: None,
            google_id: Some(google_id.to_string()),
            profile_image: profile_image.map(str::to_string),
            created_at: now,
            updated_at: now,
        })
        .await
    }

    async fn link_provider_id(
        &self,
        user_id: Uuid,
        google_id: &str,
        profile_image: Option<&str>,
    ) -> Result<User, StoreError> {
        self.check_up()?;
        let mut rows = self.rows.lock().await;
        if rows.iter().any(|u| u.google_id.as_deref() == Some(google_id)) {
            return Err(StoreError::Duplicate {
                constraint: "users_google_id_key".into(),
            });
        }
        let user = rows
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(StoreError::NotFound(user_id))?;
        if user.google_id.is_some() {
            return Err(StoreError::LinkRaced(user_id));
        }
        user.google_id = Some(google_id.to_string());
        if user.profile_image.is_none() {
            user.profile_image = profile_image.map(str::to_string);
        }
        user.updated_at = OffsetDateTime::now_utc();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(user.clone())
    }

    async fn set_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        self.check_up()?;
        let mut rows = self.rows.lock().await;
        let user = rows
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(StoreError::NotFound(user_id))?;
        user.password_hash = Some(password_hash.to_string());
        user.updated_at = OffsetDateTime::now_utc();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_duplicate_email_and_google_id() {
        let store = MemoryUserStore::new();
        store.insert_federated_user("a@x.com", "g-1", None).await.unwrap();

        let err = store.insert_password_user("a@x.com", "h").await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { ref constraint } if constraint == "users_email_lower_key"));

        let err = store
            .insert_federated_user("b@x.com", "g-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { ref constraint } if constraint == "users_google_id_key"));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn email_uniqueness_ignores_case() {
        let store = MemoryUserStore::new();
        let user = store.insert_password_user(" A@X.com", "h").await.unwrap();
        assert_eq!(user.email, "a@x.com");

        let err = store
            .insert_federated_user("a@X.COM", "g-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));

        let found = store.find_by_email("A@x.Com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn link_is_guarded_on_null_google_id() {
        let store = MemoryUserStore::new();
        let user = store.seed("a@x.com", Some("h"), Some("g-1")).await;
        let err = store.link_provider_id(user.id, "g-2", None).await.unwrap_err();
        assert!(matches!(err, StoreError::LinkRaced(id) if id == user.id));
        assert_eq!(store.writes(), 0);
    }
}
