use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

/// Payment intent state as reported by the gateway. Every field is untrusted.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub status: IntentStatus,
    /// Captured amount in the currency's minor unit.
    #[serde(default)]
    pub amount_received: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    RequiresCapture,
    Canceled,
    #[default]
    #[serde(other)]
    Unknown,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Processing => "processing",
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment intent not found")]
    NotFound,

    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Read-only lookup of a payment intent; safe to retry.
    async fn retrieve_payment_intent(
        &self,
        secret_key: &SecretString,
        intent_id: &str,
    ) -> Result<PaymentIntent, GatewayError>;
}

#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
}

impl StripeGateway {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, secret_key))]
    async fn retrieve_payment_intent(
        &self,
        secret_key: &SecretString,
        intent_id: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let url = format!("{}/v1/payment_intents/{}", self.api_base, intent_id);

        let response = self
            .client
            .get(&url)
            .basic_auth(secret_key.expose_secret(), Some(""))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Unavailable(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound);
        }
        if !status.is_success() {
            warn!(status = %status, "stripe rejected payment intent lookup");
            return Err(GatewayError::Unavailable(format!("stripe returned {status}")));
        }

        let intent: PaymentIntent = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::Malformed(e.without_url().to_string())
            }
        })?;

        debug!(status = intent.status.as_str(), "payment intent retrieved");
        Ok(intent)
    }
}
