//! `/api/v1/auth`: registration, login and session lookup.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::extract::{ApiJson, CurrentUser};
use super::{success, AppState};
use crate::db::{models::NewUser, sessions, users};
use crate::error::{ApiError, ApiResult};

const MIN_PASSWORD_LEN: usize = 6;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub(crate) fn validate_email(email: &str) -> ApiResult<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest("Please add a valid email".into()))
    }
}

pub(crate) fn validate_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Argon2id hash; runs on the blocking pool.
pub(crate) async fn hash_password(password: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
            .map_err(|e| ApiError::Internal(format!("Salt generation failed: {e}")))?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::Internal(format!("Password hash error: {e}")))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Hashing task failed: {e}")))?
}

pub(crate) async fn verify_password(password: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Verify task failed: {e}")))
}

fn with_token(status: StatusCode, token: String, data: Option<serde_json::Value>) -> Response {
    let mut body = json!({ "success": true, "token": token });
    if let Some(data) = data {
        body["data"] = data;
    }
    (status, Json(body)).into_response()
}

async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterBody>,
) -> ApiResult<Response> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Please add a name".into()));
    }
    validate_email(&body.email)?;
    validate_password(&body.password)?;

    let password_hash = hash_password(body.password).await?;
    let user = users::create(
        state.db.pool(),
        NewUser {
            name,
            email: body.email,
            role: "user".into(),
            password_hash,
        },
    )
    .await?;
    let token = sessions::create(state.db.pool(), &user.id).await?;

    tracing::info!(user_id = %user.id, "User registered");
    let data = serde_json::to_value(&user)
        .map_err(|e| ApiError::Internal(format!("Serializing user failed: {e}")))?;
    Ok(with_token(StatusCode::CREATED, token, Some(data)))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginBody>,
) -> ApiResult<Response> {
    if body.email.is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Please provide an email and password".into(),
        ));
    }

    let invalid = || ApiError::Unauthorized("Invalid credentials".into());
    let user = users::find_by_email(state.db.pool(), &body.email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(body.password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    let token = sessions::create(state.db.pool(), &user.id).await?;
    tracing::info!(user_id = %user.id, "User logged in");
    Ok(with_token(StatusCode::OK, token, None))
}

async fn me(current: CurrentUser) -> Response {
    success(StatusCode::OK, current.user)
}

async fn logout(State(state): State<AppState>, current: CurrentUser) -> ApiResult<Response> {
    sessions::delete(state.db.pool(), &current.token).await?;
    Ok(success(StatusCode::OK, json!({})))
}
