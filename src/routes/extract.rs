//! Extractors that reject with [`ApiError`], so malformed input gets the
//! same structured response as every other failure.

use axum::{
    extract::{FromRequest, FromRequestParts},
    http::{header, request::Parts},
};

use super::AppState;
use crate::db::{sessions, User};
use crate::error::ApiError;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// The user behind a `Bearer` session token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let unauthorized = || ApiError::Unauthorized("Not authorized to access this route".into());

        let token = bearer_token(parts).ok_or_else(unauthorized)?.to_string();
        let user = sessions::find_user(state.db.pool(), &token)
            .await?
            .ok_or_else(unauthorized)?;
        Ok(CurrentUser { user, token })
    }
}
