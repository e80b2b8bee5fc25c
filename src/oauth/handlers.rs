use axum::{
    extract::{FromRef, Query, State},
    http::StatusCode,
    response::Redirect,
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{error::LoginError, reconciler::Outcome};
use crate::{
    auth::{
        dto::AuthResponse,
        handlers::issue_session,
        jwt::{JwtKeys, OAUTH_STATE_TTL},
    },
    state::AppState,
};

/// Holds the nonce of the `state` token so a callback only completes in the
/// browser that started the login.
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

pub fn google_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google/status", get(google_status))
        .route("/auth/google/login", get(google_login))
        .route("/auth/google/callback", get(google_callback))
}

#[derive(Debug, Serialize)]
pub struct GoogleStatus {
    pub configured: bool,
}

/// Query string Google appends to the redirect URI.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GoogleLoginResponse {
    #[serde(flatten)]
    pub session: AuthResponse,
    pub outcome: Outcome,
}

pub async fn google_status(State(state): State<AppState>) -> Json<GoogleStatus> {
    Json(GoogleStatus {
        configured: state.google_configured(),
    })
}

fn state_cookie(nonce: Uuid, secure: bool) -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE, nonce.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::seconds(OAUTH_STATE_TTL.as_secs() as i64))
        .build()
}

#[instrument(skip(state, jar))]
pub async fn google_login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), (StatusCode, String)> {
    let Some(provider) = state.google.as_ref() else {
        warn!("google login requested but not configured");
        return Err(LoginError::NotConfigured.reject());
    };

    let nonce = Uuid::new_v4();
    let keys = JwtKeys::from_ref(&state);
    let oauth_state = keys.sign_oauth_state(nonce).map_err(|e| {
        error!(error = %e, "failed to sign oauth state");
        LoginError::Session(e.to_string()).reject()
    })?;

    let secure = state
        .config
        .google
        .as_ref()
        .is_some_and(|g| g.redirect_uri.starts_with("https://"));
    let jar = jar.add(state_cookie(nonce, secure));

    Ok((jar, Redirect::to(&provider.authorization_url(&oauth_state))))
}

/// The state cookie is single use: it is cleared whatever the outcome.
#[instrument(skip(state, jar, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> (CookieJar, Result<Json<GoogleLoginResponse>, (StatusCode, String)>) {
    let nonce = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build((OAUTH_STATE_COOKIE, "")).path("/"));

    let result = complete_login(&state, query, nonce.as_deref())
        .await
        .map(Json)
        .map_err(|e| {
            match &e {
                LoginError::Denied(_) | LoginError::InvalidState | LoginError::MissingCode => {
                    warn!(error = %e, "google callback rejected")
                }
                _ => error!(error = %e, "google login failed"),
            }
            e.reject()
        });
    (jar, result)
}

/// Callback state machine: provider error, state check against the browser's
/// nonce cookie, code exchange, reconciliation, session.
pub(crate) async fn complete_login(
    state: &AppState,
    query: CallbackQuery,
    nonce_cookie: Option<&str>,
) -> Result<GoogleLoginResponse, LoginError> {
    let provider = state.google.as_ref().ok_or(LoginError::NotConfigured)?;

    if let Some(err) = query.error {
        return Err(LoginError::Denied(err));
    }

    let keys = JwtKeys::from_ref(state);
    let oauth_state = query.state.ok_or(LoginError::InvalidState)?;
    let claims = keys
        .verify_oauth_state(&oauth_state)
        .map_err(|_| LoginError::InvalidState)?;
    let cookie_nonce = nonce_cookie.and_then(|v| Uuid::parse_str(v).ok());
    if cookie_nonce != Some(claims.sub) {
        warn!(has_cookie = nonce_cookie.is_some(), "oauth state not issued to this browser");
        return Err(LoginError::InvalidState);
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or(LoginError::MissingCode)?;

    let assertion = provider.exchange_code(&code).await?;
    let resolution = state.reconciler.resolve(&assertion).await?;

    let session = issue_session(&keys, &resolution.user)
        .map_err(|e| LoginError::Session(e.to_string()))?;

    info!(
        user_id = %resolution.user.id,
        outcome = ?resolution.outcome,
        "google login completed"
    );
    Ok(GoogleLoginResponse {
        session,
        outcome: resolution.outcome,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::{header, HeaderMap, HeaderValue};
    use axum::response::IntoResponse;

    use super::*;
    use crate::oauth::{
        assertion::VerifiedAssertion,
        error::ReconcileError,
        provider::{CredentialProvider, ProviderError},
    };
    use crate::users::memory::MemoryUserStore;

    /// Returns a canned assertion for any code except "bad".
    struct StubProvider {
        assertion: VerifiedAssertion,
    }

    #[async_trait]
    impl CredentialProvider for StubProvider {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://accounts.example/auth?state={state}")
        }

        async fn exchange_code(&self, code: &str) -> Result<VerifiedAssertion, ProviderError> {
            if code == "bad" {
                return Err(ProviderError::Rejected("invalid_grant".into()));
            }
            Ok(self.assertion.clone())
        }
    }

    fn state_for(store: Arc<MemoryUserStore>, sub: &str, email: &str) -> AppState {
        let provider = StubProvider {
            assertion: VerifiedAssertion {
                subject_id: sub.into(),
                email: email.into(),
                email_verified: true,
                picture: None,
            },
        };
        AppState::for_tests(store, Some(Arc::new(provider) as Arc<dyn CredentialProvider>))
    }

    fn query(state: &AppState, nonce: Uuid, code: &str) -> CallbackQuery {
        let keys = JwtKeys::from_ref(state);
        CallbackQuery {
            code: Some(code.into()),
            state: Some(keys.sign_oauth_state(nonce).unwrap()),
            error: None,
        }
    }

    /// Callback from the browser that holds the matching nonce cookie.
    async fn callback(state: &AppState, code: &str) -> Result<GoogleLoginResponse, LoginError> {
        let nonce = Uuid::new_v4();
        complete_login(state, query(state, nonce, code), Some(&nonce.to_string())).await
    }

    #[tokio::test]
    async fn first_login_creates_then_repeats_as_existing() {
        let store = Arc::new(MemoryUserStore::new());
        let state = state_for(store.clone(), "g-2", "b@x.com");

        let first = callback(&state, "code").await.unwrap();
        assert_eq!(first.outcome, Outcome::CreatedNew);
        assert!(first.session.user.google_linked);
        assert!(!first.session.user.has_password);

        let again = callback(&state, "code").await.unwrap();
        assert_eq!(again.outcome, Outcome::ExistingLinked);
        assert_eq!(again.session.user.id, first.session.user.id);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn links_password_account_and_issues_session() {
        let store = Arc::new(MemoryUserStore::new());
        let seeded = store.seed("a@x.com", Some("h"), None).await;
        let state = state_for(store, "g-1", "a@x.com");

        let res = callback(&state, "code").await.unwrap();
        assert_eq!(res.outcome, Outcome::LinkedExistingPasswordAccount);
        assert_eq!(res.session.user.id, seeded.id);

        let keys = JwtKeys::from_ref(&state);
        let claims = keys.verify_refresh(&res.session.refresh_token).unwrap();
        assert_eq!(claims.sub, seeded.id);
    }

    #[tokio::test]
    async fn conflict_is_reported() {
        let store = Arc::new(MemoryUserStore::new());
        store.seed("c@x.com", None, Some("g-3")).await;
        let state = state_for(store, "g-4", "c@x.com");

        let err = callback(&state, "code").await.unwrap_err();
        assert!(matches!(
            err,
            LoginError::Reconcile(ReconcileError::IdentityConflict { .. })
        ));
        assert_eq!(err.reject().0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rejects_missing_or_forged_state() {
        let store = Arc::new(MemoryUserStore::new());
        let state = state_for(store.clone(), "g-5", "d@x.com");
        let nonce = Uuid::new_v4().to_string();

        let missing = CallbackQuery {
            code: Some("code".into()),
            ..Default::default()
        };
        assert!(matches!(
            complete_login(&state, missing, Some(&nonce)).await,
            Err(LoginError::InvalidState)
        ));

        let keys = JwtKeys::from_ref(&state);
        let access = keys.sign_access(Uuid::new_v4()).unwrap();
        let forged = CallbackQuery {
            code: Some("code".into()),
            state: Some(access),
            error: None,
        };
        assert!(matches!(
            complete_login(&state, forged, Some(&nonce)).await,
            Err(LoginError::InvalidState)
        ));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn state_issued_to_another_browser_is_rejected() {
        let store = Arc::new(MemoryUserStore::new());
        let state = state_for(store.clone(), "g-8", "h@x.com");
        let issued_to = Uuid::new_v4();
        let other_browser = Uuid::new_v4().to_string();

        for cookie in [Some(other_browser.as_str()), None, Some("not-a-uuid")] {
            let res = complete_login(&state, query(&state, issued_to, "code"), cookie).await;
            assert!(matches!(res, Err(LoginError::InvalidState)));
        }
        assert_eq!(store.writes(), 0);
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn login_cookie_completes_the_callback() {
        let state = state_for(Arc::new(MemoryUserStore::new()), "g-9", "i@x.com");

        let (jar, redirect) = google_login(State(state.clone()), CookieJar::new())
            .await
            .unwrap();
        let cookie = jar.get(OAUTH_STATE_COOKIE).expect("state cookie set").clone();
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));

        let response = redirect.into_response();
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let (_, oauth_state) = location.split_once("state=").expect("state in url");

        let q = CallbackQuery {
            code: Some("code".into()),
            state: Some(oauth_state.to_string()),
            error: None,
        };
        let res = complete_login(&state, q, Some(cookie.value())).await.unwrap();
        assert_eq!(res.outcome, Outcome::CreatedNew);
    }

    #[tokio::test]
    async fn callback_clears_state_cookie() {
        let store = Arc::new(MemoryUserStore::new());
        let state = state_for(store, "g-10", "j@x.com");
        let nonce = Uuid::new_v4();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{OAUTH_STATE_COOKIE}={nonce}")).unwrap(),
        );
        let jar = CookieJar::from_headers(&headers);

        let q = query(&state, nonce, "code");
        let (jar, result) = google_callback(State(state), jar, Query(q)).await;
        assert!(result.is_ok());
        assert!(jar.get(OAUTH_STATE_COOKIE).is_none());

        let response = jar.into_response();
        let cleared = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.starts_with("oauth_state=") && v.contains("Max-Age=0"));
        assert!(cleared);
    }

    #[tokio::test]
    async fn provider_error_and_denial_stop_before_store() {
        let store = Arc::new(MemoryUserStore::new());
        let state = state_for(store.clone(), "g-6", "e@x.com");

        let err = callback(&state, "bad").await.unwrap_err();
        assert!(matches!(err, LoginError::Provider(ProviderError::Rejected(_))));

        let denied = CallbackQuery {
            error: Some("access_denied".into()),
            ..Default::default()
        };
        assert!(matches!(
            complete_login(&state, denied, None).await,
            Err(LoginError::Denied(_))
        ));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn not_configured_is_reported_on_login_and_status() {
        let state = AppState::for_tests(Arc::new(MemoryUserStore::new()), None);

        let Err(err) = google_login(State(state.clone()), CookieJar::new()).await else {
            panic!("login should fail when google is not configured");
        };
        assert_eq!(err.0, StatusCode::SERVICE_UNAVAILABLE);

        let Json(status) = google_status(State(state.clone())).await;
        assert!(!status.configured);

        assert!(matches!(
            complete_login(&state, CallbackQuery::default(), None).await,
            Err(LoginError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn login_redirects_when_configured() {
        let state = state_for(Arc::new(MemoryUserStore::new()), "g-7", "f@x.com");
        assert!(google_status(State(state.clone())).await.0.configured);
        assert!(google_login(State(state), CookieJar::new()).await.is_ok());
    }
}
