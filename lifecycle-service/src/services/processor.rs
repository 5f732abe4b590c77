//! Payment processor webhook client.
//!
//! Verifies webhook authenticity and parses the event payload. The
//! handler layer feeds verified payment events into the transition
//! executor; nothing here touches storage.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::config::ProcessorConfig;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Processor-Signature";

/// Processor webhook client.
#[derive(Clone)]
pub struct ProcessorClient {
    config: ProcessorConfig,
}

/// Webhook event envelope.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payment: Option<PaymentEventData>,
    #[serde(default)]
    pub account: Option<AccountEventData>,
}

/// Payload for `payment.succeeded` / `payment.failed` events.
#[derive(Debug, Deserialize)]
pub struct PaymentEventData {
    pub account_id: Uuid,
    pub invoice_id: Uuid,
    pub payment_ref: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Payload for `account.updated` events.
#[derive(Debug, Deserialize)]
pub struct AccountEventData {
    pub processor_account_id: String,
    pub payouts_enabled: bool,
}

impl ProcessorClient {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_configured(&self) -> bool {
        !self.config.webhook_secret.expose_secret().is_empty()
    }

    /// Verify webhook signature.
    ///
    /// The signature is computed as:
    /// `HMAC-SHA256(request_body, webhook_secret)`
    pub fn verify_webhook_signature(&self, body: &str, signature: &str) -> Result<bool> {
        let expected_signature =
            self.compute_signature(body, self.config.webhook_secret.expose_secret())?;

        let is_valid = expected_signature == signature;

        if !is_valid {
            tracing::warn!("Webhook signature verification failed");
        }

        Ok(is_valid)
    }

    /// Parse webhook event from request body.
    pub fn parse_webhook_event(&self, body: &str) -> Result<WebhookEvent> {
        let event: WebhookEvent = serde_json::from_str(body)?;
        Ok(event)
    }

    /// Compute HMAC-SHA256 signature.
    fn compute_signature(&self, payload: &str, secret: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| anyhow!("Invalid key length"))?;
        mac.update(payload.as_bytes());
        let result = mac.finalize();
        Ok(hex::encode(result.into_bytes()))
    }
}
