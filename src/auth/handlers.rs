use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest, SetPasswordRequest},
        jwt::{AuthUser, JwtKeys},
        password::{check_policy, hash_password, verify_password},
    },
    state::AppState,
    users::{is_valid_email, normalize_email, StoreError, User},
};

type Rejection = (StatusCode, String);

fn internal() -> Rejection {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/me/password", put(set_password))
}

/// Signs a token pair for `user`. Shared by password and Google login.
pub(crate) fn issue_session(keys: &JwtKeys, user: &User) -> anyhow::Result<AuthResponse> {
    let (access_token, refresh_token) = keys.sign_pair(user.id)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(user),
    })
}

fn session_or_500(state: &AppState, user: &User) -> Result<Json<AuthResponse>, Rejection> {
    let keys = JwtKeys::from_ref(state);
    issue_session(&keys, user).map(Json).map_err(|e| {
        error!(error = %e, user_id = %user.id, "jwt sign failed");
        internal()
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, Rejection> {
    let email = normalize_email(&payload.email);

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    if let Err(msg) = check_policy(&payload.password) {
        warn!("password rejected by policy");
        return Err((StatusCode::BAD_REQUEST, msg.into()));
    }

    match state.users.find_by_email(&email).await {
        Ok(Some(_)) => {
            warn!(email = %email, "email already registered");
            return Err((StatusCode::CONFLICT, "Email already registered".into()));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(internal());
        }
    }

    let hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        internal()
    })?;

    let user = match state.users.insert_password_user(&email, &hash).await {
        Ok(u) => u,
        Err(StoreError::Duplicate { constraint }) => {
            warn!(email = %email, %constraint, "email registered concurrently");
            return Err((StatusCode::CONFLICT, "Email already registered".into()));
        }
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err(internal());
        }
    };

    info!(user_id = %user.id, email = %user.email, "user registered");
    session_or_500(&state, &user)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, Rejection> {
    let email = normalize_email(&payload.email);

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    let user = match state.users.find_by_email(&email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %email, "login unknown email");
            return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
        }
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(internal());
        }
    };

    let ok = verify_password(&payload.password, user.password_hash.as_deref()).map_err(|e| {
        error!(error = %e, user_id = %user.id, "verify_password failed");
        internal()
    })?;

    if !ok {
        warn!(
            user_id = %user.id,
            has_password = user.has_password(),
            "login invalid password"
        );
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    session_or_500(&state, &user)
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, Rejection> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        (StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string())
    })?;

    let user = match state.users.find_by_id(claims.sub).await {
        Ok(Some(u)) => u,
        Ok(None) => return Err((StatusCode::UNAUTHORIZED, "User not found".into())),
        Err(e) => {
            error!(error = %e, user_id = %claims.sub, "find_by_id failed");
            return Err(internal());
        }
    };
    session_or_500(&state, &user)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, Rejection> {
    match state.users.find_by_id(user_id).await {
        Ok(Some(user)) => Ok(Json(PublicUser::from(&user))),
        Ok(None) => {
            warn!(user_id = %user_id, "user not found");
            Err((StatusCode::UNAUTHORIZED, "User not found".into()))
        }
        Err(e) => {
            error!(error = %e, user_id = %user_id, "find_by_id failed");
            Err(internal())
        }
    }
}

/// Adds or replaces the password. A linked Google identity stays valid.
#[instrument(skip(state, payload))]
pub async fn set_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<SetPasswordRequest>,
) -> Result<Json<PublicUser>, Rejection> {
    if let Err(msg) = check_policy(&payload.password) {
        return Err((StatusCode::BAD_REQUEST, msg.into()));
    }

    let hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        internal()
    })?;

    match state.users.set_password_hash(user_id, &hash).await {
        Ok(user) => {
            info!(user_id = %user.id, google_linked = user.is_google_linked(), "password set");
            Ok(Json(PublicUser::from(&user)))
        }
        Err(StoreError::NotFound(_)) => Err((StatusCode::UNAUTHORIZED, "User not found".into())),
        Err(e) => {
            error!(error = %e, user_id = %user_id, "set_password_hash failed");
            Err(internal())
        }
    }
}
