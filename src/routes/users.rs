//! `/api/v1/users`: user CRUD and avatar upload.

use std::path::Path as FsPath;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::auth::{hash_password, validate_email, validate_password};
use super::extract::{ApiJson, ApiQuery};
use super::{success, AppState};
use crate::db::models::{NewUser, UserChanges};
use crate::db::users;
use crate::error::{ApiError, ApiResult};
use crate::http::context::{UploadedFile, Uploads};

const DEFAULT_PAGE_SIZE: u32 = 25;
const MAX_PAGE_SIZE: u32 = 100;
const ROLES: &[&str] = &["user", "publisher"];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{id}", get(get_user).put(update_user).delete(delete_user))
        .route("/{id}/avatar", post(upload_avatar))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserBody {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

fn validate_role(role: &str) -> ApiResult<()> {
    if ROLES.contains(&role) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Role '{role}' is not allowed")))
    }
}

async fn list_users(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Response> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(limit);

    let total = users::count(state.db.pool()).await?;
    let data = users::list(state.db.pool(), limit, offset).await?;

    let body = json!({
        "success": true,
        "count": data.len(),
        "pagination": { "page": page, "limit": limit, "total": total },
        "data": data,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

async fn create_user(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateUserBody>,
) -> ApiResult<Response> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Please add a name".into()));
    }
    validate_email(&body.email)?;
    validate_password(&body.password)?;
    let role = body.role.unwrap_or_else(|| "user".to_string());
    validate_role(&role)?;

    let password_hash = hash_password(body.password).await?;
    let user = users::create(
        state.db.pool(),
        NewUser {
            name,
            email: body.email,
            role,
            password_hash,
        },
    )
    .await?;
    Ok(success(StatusCode::CREATED, user))
}

async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let user = users::find_by_id(state.db.pool(), &id).await?;
    Ok(success(StatusCode::OK, user))
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<UpdateUserBody>,
) -> ApiResult<Response> {
    if let Some(email) = &body.email {
        validate_email(email)?;
    }
    if let Some(role) = &body.role {
        validate_role(role)?;
    }
    let name = body
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let user = users::update(
        state.db.pool(),
        &id,
        UserChanges {
            name,
            email: body.email,
            role: body.role,
        },
    )
    .await?;
    Ok(success(StatusCode::OK, user))
}

async fn delete_user(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    users::delete(state.db.pool(), &id).await?;
    Ok(success(StatusCode::OK, json!({})))
}

/// Extension from the uploaded name, restricted to a short alphanumeric run.
fn file_extension(file_name: &str) -> Option<String> {
    let ext = FsPath::new(file_name).extension()?.to_str()?;
    (!ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| ext.to_ascii_lowercase())
}

fn pick_image(uploads: &Uploads) -> ApiResult<&UploadedFile> {
    let file = uploads
        .0
        .iter()
        .find(|f| f.field == "file")
        .or_else(|| uploads.0.first())
        .ok_or_else(|| ApiError::BadRequest("Please upload a file".into()))?;

    let is_image = file
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"));
    if !is_image {
        return Err(ApiError::BadRequest("Please upload an image file".into()));
    }
    Ok(file)
}

async fn upload_avatar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    uploads: Option<Extension<Uploads>>,
) -> ApiResult<Response> {
    let uploads = uploads.map(|Extension(u)| u).unwrap_or_default();
    let file = pick_image(&uploads)?;
    let user = users::find_by_id(state.db.pool(), &id).await?;

    let stored_name = match file_extension(&file.file_name) {
        Some(ext) => format!("avatar_{}.{ext}", user.id),
        None => format!("avatar_{}", user.id),
    };
    tokio::fs::create_dir_all(&state.uploads_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Creating upload dir failed: {e}")))?;
    tokio::fs::write(state.uploads_dir.join(&stored_name), &file.data)
        .await
        .map_err(|e| ApiError::Internal(format!("Writing upload failed: {e}")))?;

    let url = format!("/uploads/{stored_name}");
    let user = users::set_avatar(state.db.pool(), &user.id, &url).await?;
    tracing::info!(user_id = %user.id, bytes = file.data.len(), "Avatar uploaded");
    Ok(success(StatusCode::OK, user))
}
