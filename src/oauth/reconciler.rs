use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::assertion::{CheckedAssertion, VerifiedAssertion};
use super::error::ReconcileError;
use crate::users::{StoreError, User, UserStore};

/// How an assertion was matched to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The Google identity was already linked. Nothing was written.
    ExistingLinked,
    /// A password account with the same email got the Google identity attached.
    LinkedExistingPasswordAccount,
    /// No match: a new Google-only account was inserted.
    CreatedNew,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub user: User,
    pub outcome: Outcome,
}

enum StepError {
    Conflict(User),
    Store(StoreError),
}

impl From<StoreError> for StepError {
    fn from(e: StoreError) -> Self {
        StepError::Store(e)
    }
}

/// Maps verified assertions to exactly one user row.
#[derive(Clone)]
pub struct IdentityReconciler {
    store: Arc<dyn UserStore>,
}

impl IdentityReconciler {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Resolves an assertion to a user, linking or creating as needed.
    ///
    /// Lookup order is subject id, then email. When a write loses a race to a
    /// concurrent resolution (unique violation or a failed link guard), the
    /// lookup runs once more so the loser observes the winner's row.
    #[instrument(skip(self, assertion), fields(subject_id = %assertion.subject_id))]
    pub async fn resolve(&self, assertion: &VerifiedAssertion) -> Result<Resolution, ReconcileError> {
        let checked = assertion.check().map_err(|reason| {
            warn!(reason, "assertion rejected");
            ReconcileError::InvalidAssertion(reason)
        })?;

        let mut raced = false;
        loop {
            match self.attempt(&checked).await {
                Ok(resolution) => {
                    info!(
                        user_id = %resolution.user.id,
                        outcome = ?resolution.outcome,
                        raced,
                        "assertion resolved"
                    );
                    return Ok(resolution);
                }
                Err(StepError::Conflict(user)) => {
                    warn!(
                        user_id = %user.id,
                        email = %checked.email,
                        "email already linked to a different google identity"
                    );
                    return Err(ReconcileError::IdentityConflict { user_id: user.id });
                }
                Err(StepError::Store(e)) if e.is_race() && !raced => {
                    debug!(error = %e, "lost write race, re-reading");
                    raced = true;
                }
                Err(StepError::Store(e)) => {
                    warn!(error = %e, "user store failed during resolution");
                    return Err(ReconcileError::StoreUnavailable(e.to_string()));
                }
            }
        }
    }

    async fn attempt(&self, a: &CheckedAssertion) -> Result<Resolution, StepError> {
        if let Some(user) = self.store.find_by_provider_id(&a.subject_id).await? {
            return Ok(Resolution {
                user,
                outcome: Outcome::ExistingLinked,
            });
        }

        if let Some(existing) = self.store.find_by_email(&a.email).await? {
            return match existing.google_id.as_deref() {
                Some(other) if other != a.subject_id => Err(StepError::Conflict(existing)),
                // Linked to this subject between our two reads.
                Some(_) => Ok(Resolution {
                    user: existing,
                    outcome: Outcome::ExistingLinked,
                }),
                None => {
                    let user = self
                        .store
                        .link_provider_id(existing.id, &a.subject_id, a.picture.as_deref())
                        .await?;
                    Ok(Resolution {
                        user,
                        outcome: Outcome::LinkedExistingPasswordAccount,
                    })
                }
            };
        }

        let user = self
            .store
            .insert_federated_user(&a.email, &a.subject_id, a.picture.as_deref())
            .await?;
        Ok(Resolution {
            user,
            outcome: Outcome::CreatedNew,
        })
    }
}
