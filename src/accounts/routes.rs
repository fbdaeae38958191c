//! REST endpoints under `/api/v1/auth`.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use secrecy::SecretString;
use serde_json::json;
use tracing::{debug, info};

use super::model::{AuthResponse, Email, SessionToken, SignInRequest, SignUpRequest, User};
use super::password::{hash_password, verify_password};
use crate::api::AppState;
use crate::auth::CurrentUser;
use crate::error::{ApiError, AuthError, DatabaseError};
use crate::extract::ApiJson;

/// Sign a fresh token for `user` and wrap both in the response body.
fn start_session(state: &AppState, user: User) -> Result<AuthResponse, ApiError> {
    let issued = state
        .resolver
        .issue(&user.id)
        .map_err(|e| ApiError::Internal(format!("token signing: {e}")))?;
    Ok(AuthResponse {
        user,
        session: SessionToken {
            token: issued.token,
            expires_at: issued.expires_at,
        },
    })
}

/// Argon2 is CPU-bound; keep it off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("password task: {e}")))
}

/// POST /api/v1/auth/signup
async fn signup(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (new_user, password) = body.into_parts()?;
    let hash = blocking(move || hash_password(&password))
        .await?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let user = state.db.create_user(&new_user, &hash).await?;
    info!(user_id = %user.id, "Signed up");
    Ok((StatusCode::CREATED, Json(start_session(&state, user)?)))
}

/// POST /api/v1/auth/signin
///
/// Unknown email and wrong password are indistinguishable to the caller.
async fn signin(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Ok(email) = Email::parse(&body.email) else {
        return Err(AuthError::InvalidCredentials.into());
    };
    let Some((user, stored_hash)) = state.db.find_user_credentials(&email).await? else {
        debug!("Sign-in for unknown email");
        return Err(AuthError::InvalidCredentials.into());
    };

    let password: SecretString = body.password;
    let matches = blocking(move || verify_password(&password, &stored_hash)).await?;
    if !matches {
        debug!(user_id = %user.id, "Sign-in with wrong password");
        return Err(AuthError::InvalidCredentials.into());
    }

    info!(user_id = %user.id, "Signed in");
    Ok(Json(start_session(&state, user)?))
}

/// POST /api/v1/auth/signout
///
/// Revokes the presented token; other sessions stay valid.
async fn signout(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .revoke_token(&user.token_id, user.token_expires_at)
        .await?;
    info!(user_id = %user.id, "Signed out");
    Ok(Json(json!({ "success": true })))
}

/// GET /api/v1/auth/session
///
/// Tokens minted outside sign-up (for instance by `taskflow-token`) have no
/// account row, so `user` is null for them.
async fn session(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let account = match state.db.get_user(&user.id).await {
        Ok(account) => Some(account),
        Err(DatabaseError::NotFound { .. }) => None,
        Err(e) => return Err(e.into()),
    };
    Ok(Json(json!({
        "user_id": user.id,
        "user": account,
        "expires_at": user.token_expires_at,
    })))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/auth/signup", post(signup))
        .route("/api/v1/auth/signin", post(signin))
        .route("/api/v1/auth/signout", post(signout))
        .route("/api/v1/auth/session", get(session))
}
