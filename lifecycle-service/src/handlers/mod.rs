//! HTTP handlers for lifecycle-service.

pub mod accounts;
pub mod invoices;
pub mod webhook;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;

use crate::engine::TransitionError;
use crate::services::store::StoreError;
use crate::AppState;

/// Handler-level error: infrastructure failures ride on [`AppError`],
/// state-machine rejections keep their taxonomy code all the way to the
/// wire.
#[derive(Debug)]
pub enum ApiError {
    App(AppError),
    Transition(TransitionError),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError::App(err)
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        ApiError::Transition(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::App(AppError::ValidationError(err))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::App(match err {
            StoreError::Invalid(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            StoreError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            StoreError::Database(e) => AppError::DatabaseError(e),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::App(err) => err.into_response(),
            ApiError::Transition(err) => err.into_response(),
        }
    }
}

impl IntoResponse for TransitionError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct TransitionErrorBody {
            code: &'static str,
            error: String,
        }

        let status = match &self {
            TransitionError::NotFound => StatusCode::NOT_FOUND,
            TransitionError::InvoiceDeleted
            | TransitionError::InvalidStateTransition { .. }
            | TransitionError::ReferenceMismatch { .. } => StatusCode::CONFLICT,
            TransitionError::MissingRequiredField { .. }
            | TransitionError::AmountMismatch { .. }
            | TransitionError::CurrencyMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TransitionError::Internal(err) => {
                tracing::error!(error = %err, "Transition failed unexpectedly");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = TransitionErrorBody {
            code: self.code(),
            error: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state
        .store
        .health_check()
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Store unhealthy: {}", e)))?;
    Ok(Json(HealthResponse { status: "healthy" }))
}

pub async fn metrics() -> String {
    crate::services::get_metrics()
}
