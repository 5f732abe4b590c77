//! Account handlers.
//!
//! The payout status returned here is read from persisted state on every
//! request; nothing caches it at process scope.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use validator::Validate;

use crate::engine::TransitionError;
use crate::middleware::AccountContext;
use crate::models::Account;
use crate::AppState;

use super::ApiError;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub processor_account_id: Option<String>,
}

pub async fn create_account(
    State(state): State<AppState>,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    payload.validate()?;

    let account = state
        .store
        .create_account(&payload.name, payload.processor_account_id.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn get_account(
    State(state): State<AppState>,
    ctx: AccountContext,
) -> Result<Json<Account>, ApiError> {
    let account = state
        .store
        .get_account(ctx.account_id)
        .await?
        .ok_or(TransitionError::NotFound)?;

    Ok(Json(account))
}
