use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Google OAuth client credentials. Present only when both secrets are set.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/api/v1/auth/google/callback";

impl GoogleConfig {
    /// Builds the config from raw values. Missing or blank credentials yield `None`,
    /// which disables Google login instead of failing startup.
    pub fn from_parts(
        client_id: Option<String>,
        client_secret: Option<String>,
        redirect_uri: Option<String>,
    ) -> Option<Self> {
        let client_id = client_id.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())?;
        let client_secret = client_secret
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())?;
        let redirect_uri = redirect_uri
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
        Some(Self {
            client_id,
            client_secret,
            redirect_uri,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Server-side cap on any single statement, lock waits included.
    pub db_statement_timeout_secs: u64,
    pub jwt: JwtConfig,
    pub google: Option<GoogleConfig>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "dualauth".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "dualauth-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let google = GoogleConfig::from_parts(
            std::env::var("GOOGLE_CLIENT_ID").ok(),
            std::env::var("GOOGLE_CLIENT_SECRET").ok(),
            std::env::var("GOOGLE_REDIRECT_URI").ok(),
        );
        Ok(Self {
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 10),
            db_acquire_timeout_secs: env_parse("DB_ACQUIRE_TIMEOUT_SECS", 5),
            db_statement_timeout_secs: env_parse("DB_STATEMENT_TIMEOUT_SECS", 10),
            jwt,
            google,
        })
    }
}
