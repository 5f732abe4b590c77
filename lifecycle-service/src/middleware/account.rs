//! Account context extractor.
//!
//! The surrounding application authenticates the caller and resolves
//! which account they act for before a request reaches this service; the
//! resolved ids travel in headers. Everything downstream scopes every
//! storage operation to `account_id`, so an invoice owned by another
//! account is indistinguishable from one that does not exist.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Caller identity extracted from request headers.
#[derive(Debug, Clone)]
pub struct AccountContext {
    /// Owning account every operation is scoped to.
    pub account_id: Uuid,
    /// User who triggered the request; absent for system calls.
    pub actor_id: Option<Uuid>,
}

#[async_trait]
impl<S> FromRequestParts<S> for AccountContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let account_id = parts
            .headers
            .get("X-Account-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!(
                    "Missing X-Account-ID header (required from gateway)"
                ))
            })?
            .parse::<Uuid>()
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid X-Account-ID header")))?;

        let actor_id = parts
            .headers
            .get("X-Actor-ID")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Uuid>().ok());

        let span = tracing::Span::current();
        span.record("account_id", account_id.to_string().as_str());
        if let Some(ref actor) = actor_id {
            span.record("actor_id", actor.to_string().as_str());
        }

        Ok(AccountContext {
            account_id,
            actor_id,
        })
    }
}
