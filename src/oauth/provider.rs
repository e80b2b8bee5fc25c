use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, warn};

use super::assertion::VerifiedAssertion;
use crate::config::GoogleConfig;

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_TOKENINFO_URI: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
const SCOPES: &str = "openid email profile";

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider refused the code, or the token claims did not check out.
    #[error("rejected by provider: {0}")]
    Rejected(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Turns an authorization code into a verified assertion. Implementations do all
/// token verification; callers trust the returned assertion.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn authorization_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<VerifiedAssertion, ProviderError>;
}

pub struct GoogleProvider {
    http: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build google http client")?;
        Ok(Self { http, config })
    }

    async fn fetch_token_info(&self, id_token: &str) -> Result<TokenInfo, ProviderError> {
        let res = self
            .http
            .get(GOOGLE_TOKENINFO_URI)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "tokeninfo request failed");
                ProviderError::Unavailable(e.to_string())
            })?;
        let res = check_status(res, "tokeninfo").await?;
        res.json::<TokenInfo>()
            .await
            .map_err(|e| ProviderError::Malformed(format!("tokeninfo body: {e}")))
    }
}

async fn check_status(
    res: reqwest::Response,
    op: &'static str,
) -> Result<reqwest::Response, ProviderError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    if status.is_server_error() {
        error!(op, %status, "google returned server error");
        Err(ProviderError::Unavailable(format!("{op}: HTTP {status}")))
    } else {
        warn!(op, %status, body = %body, "google rejected request");
        Err(ProviderError::Rejected(format!("{op}: HTTP {status}")))
    }
}

#[async_trait]
impl CredentialProvider for GoogleProvider {
    fn authorization_url(&self, state: &str) -> String {
        build_authorization_url(&self.config, state)
    }

    async fn exchange_code(&self, code: &str) -> Result<VerifiedAssertion, ProviderError> {
        let params = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        debug!("exchanging authorization code");
        let res = self
            .http
            .post(GOOGLE_TOKEN_URI)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "token exchange request failed");
                ProviderError::Unavailable(e.to_string())
            })?;
        let res = check_status(res, "token exchange").await?;
        let token = res
            .json::<TokenResponse>()
            .await
            .map_err(|e| ProviderError::Malformed(format!("token body: {e}")))?;
        let id_token = token
            .id_token
            .ok_or_else(|| ProviderError::Malformed("no id_token in token response".into()))?;

        let info = self.fetch_token_info(&id_token).await?;
        check_claims(
            info,
            &self.config.client_id,
            OffsetDateTime::now_utc().unix_timestamp(),
        )
    }
}

pub fn build_authorization_url(config: &GoogleConfig, state: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&prompt=select_account",
        GOOGLE_AUTH_URI,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(SCOPES),
        urlencoding::encode(state),
    )
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

/// Google serializes some tokeninfo claims as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose<T> {
    Typed(T),
    Text(String),
}

impl Loose<bool> {
    fn value(&self) -> bool {
        match self {
            Loose::Typed(b) => *b,
            Loose::Text(s) => s.eq_ignore_ascii_case("true"),
        }
    }
}

impl Loose<i64> {
    fn value(&self) -> Option<i64> {
        match self {
            Loose::Typed(n) => Some(*n),
            Loose::Text(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenInfo {
    sub: String,
    aud: String,
    iss: String,
    exp: Loose<i64>,
    email: Option<String>,
    email_verified: Option<Loose<bool>>,
    picture: Option<String>,
}

/// Checks audience, issuer and expiry, then builds the assertion.
pub fn check_claims(
    info: TokenInfo,
    client_id: &str,
    now: i64,
) -> Result<VerifiedAssertion, ProviderError> {
    if info.aud != client_id {
        warn!(aud = %info.aud, "id_token audience mismatch");
        return Err(ProviderError::Rejected("audience mismatch".into()));
    }
    if !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
        warn!(iss = %info.iss, "id_token issuer mismatch");
        return Err(ProviderError::Rejected("issuer mismatch".into()));
    }
    match info.exp.value() {
        Some(exp) if exp > now => {}
        Some(_) => return Err(ProviderError::Rejected("id_token expired".into())),
        None => return Err(ProviderError::Malformed("unreadable exp claim".into())),
    }
    let email = info
        .email
        .ok_or_else(|| ProviderError::Malformed("id_token has no email claim".into()))?;

    Ok(VerifiedAssertion {
        subject_id: info.sub,
        email,
        email_verified: info.email_verified.map(|v| v.value()).unwrap_or(false),
        picture: info.picture,
    })
}
