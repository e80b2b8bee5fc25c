use serde::{Deserialize, Serialize};

use crate::users::{is_valid_email, normalize_email};

/// Identity claim handed over by the credential provider after it verified the
/// provider's ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedAssertion {
    pub subject_id: String,
    pub email: String,
    pub email_verified: bool,
    #[serde(default)]
    pub picture: Option<String>,
}

/// An assertion that passed local validation: trimmed subject, normalized email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedAssertion {
    pub subject_id: String,
    pub email: String,
    pub picture: Option<String>,
}

impl VerifiedAssertion {
    /// Rejects the assertion unless the subject is non-empty, the email is well
    /// formed and the provider marked it verified.
    pub fn check(&self) -> Result<CheckedAssertion, &'static str> {
        let subject_id = self.subject_id.trim();
        if subject_id.is_empty() {
            return Err("empty subject id");
        }
        let email = normalize_email(&self.email);
        if !is_valid_email(&email) {
            return Err("malformed email");
        }
        if !self.email_verified {
            return Err("email not verified by provider");
        }
        let picture = self
            .picture
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        Ok(CheckedAssertion {
            subject_id: subject_id.to_string(),
            email,
            picture,
        })
    }
}
