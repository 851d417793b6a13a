//! # Stripe Checkout Sessions
//!
//! Creates hosted Checkout Sessions for a priced manifest. Line items use
//! catalog price references (`price_...`), so Stripe computes the amount.
//! Session metadata is copied onto the payment intent, which is where the
//! `payment_intent.succeeded` webhook reads it back from.

use crate::config::StripeConfig;
use crate::webhook::{parse_event, verify_signature};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use shop_core::{
    PaymentSession, PaymentStrategy, SessionRequest, ShopError, ShopResult, WebhookEvent,
};
use tracing::{debug, error, info, instrument};

/// Stripe Checkout Session strategy
///
/// Uses Stripe's hosted checkout page for secure payments.
pub struct StripeCheckoutStrategy {
    config: StripeConfig,
    client: Client,
}

impl StripeCheckoutStrategy {
    /// Create a new Stripe checkout strategy
    pub fn new(config: StripeConfig) -> ShopResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ShopError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> ShopResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    /// Form fields for `POST /v1/checkout/sessions`
    fn form_params(request: &SessionRequest) -> ShopResult<Vec<(String, String)>> {
        let mut form_params: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("submit_type".to_string(), "pay".to_string()),
            ("customer".to_string(), request.customer_id.clone()),
            ("currency".to_string(), request.currency.clone()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            form_params.push((format!("line_items[{}][price]", i), item.price_ref.clone()));
            form_params.push((
                format!("line_items[{}][quantity]", i),
                item.quantity.to_string(),
            ));
        }

        // Sorted so the request body is deterministic.
        let mut metadata: Vec<_> = request.metadata.to_map()?.into_iter().collect();
        metadata.sort();
        for (key, value) in metadata {
            form_params.push((format!("metadata[{}]", key), value.clone()));
            form_params.push((format!("payment_intent_data[metadata][{}]", key), value));
        }

        Ok(form_params)
    }
}

#[async_trait]
impl PaymentStrategy for StripeCheckoutStrategy {
    #[instrument(skip(self, request), fields(order_id = %request.metadata.order_id))]
    async fn create_session(&self, request: &SessionRequest) -> ShopResult<PaymentSession> {
        if request.line_items.is_empty() {
            return Err(ShopError::Validation("Session has no line items".to_string()));
        }

        let form_params = Self::form_params(request)?;
        debug!(
            "Creating Stripe checkout session: {} items",
            request.line_items.len()
        );

        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);

        // The order id doubles as idempotency key, so a retried call cannot
        // open a second session for the same order.
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", &request.metadata.order_id)
            .form(&form_params)
            .send()
            .await
            .map_err(|e| ShopError::upstream("stripe", e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ShopError::upstream("stripe", e.to_string()))?;

        if !status.is_success() {
            error!("Stripe API error: status={}, body={}", status, body);

            let message = serde_json::from_str::<StripeErrorResponse>(&body)
                .map(|r| r.error.message)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

            return Err(ShopError::Provider {
                provider: "stripe".to_string(),
                message,
            });
        }

        let session: StripeCheckoutSessionResponse = serde_json::from_str(&body).map_err(|e| {
            ShopError::Serialization(format!("Failed to parse Stripe response: {}", e))
        })?;

        let checkout_url = session.url.ok_or_else(|| ShopError::Provider {
            provider: "stripe".to_string(),
            message: format!("session {} has no checkout url", session.id),
        })?;

        let amount_total = session.amount_total.ok_or_else(|| ShopError::Provider {
            provider: "stripe".to_string(),
            message: format!("session {} has no amount_total", session.id),
        })?;

        info!(
            session_id = %session.id,
            amount_total,
            "Created Stripe checkout session"
        );

        Ok(PaymentSession {
            session_id: session.id,
            checkout_url,
            reported_total: amount_total,
            expires_at: session
                .expires_at
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        })
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> ShopResult<WebhookEvent> {
        verify_signature(
            &self.config.webhook_secret,
            payload,
            signature,
            self.config.webhook_tolerance_secs,
            Utc::now(),
        )?;

        let event = parse_event(payload)?;
        debug!("Verified Stripe webhook: type={}", event.event_type.name());
        Ok(event)
    }

    fn provider_name(&self) -> &'static str {
        "stripe"
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
}
