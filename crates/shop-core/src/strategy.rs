//! # Payment Strategy Trait
//!
//! Seam between the checkout saga and a payment provider.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PaymentStrategy (trait)                  │
//! │  ├── create_session()                                       │
//! │  ├── verify_webhook()                                       │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                  ┌─────────┴─────────┐
//!                  │ StripeCheckout    │
//!                  │   Strategy        │
//!                  └───────────────────┘
//! ```

use crate::error::{ShopError, ShopResult};
use crate::order::Manifest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Metadata key carrying the order id
pub const META_ORDER_ID: &str = "order_id";
/// Metadata key carrying the user id
pub const META_USER_ID: &str = "user_id";
/// Metadata key carrying the JSON manifest
pub const META_PRODUCTS: &str = "products";

/// One priced line of a payment session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLineItem {
    /// Provider price reference
    pub price_ref: String,
    pub quantity: u32,
}

/// Correlation data attached to the session and echoed back on settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    pub order_id: String,
    pub user_id: String,
    pub manifest: Manifest,
}

impl SessionMetadata {
    /// Flatten into provider metadata key/values
    pub fn to_map(&self) -> ShopResult<HashMap<String, String>> {
        let mut map = HashMap::new();
        map.insert(META_ORDER_ID.to_string(), self.order_id.clone());
        map.insert(META_USER_ID.to_string(), self.user_id.clone());
        map.insert(META_PRODUCTS.to_string(), self.manifest.to_json()?);
        Ok(map)
    }

    /// Recover the metadata embedded at checkout
    pub fn from_map(map: &HashMap<String, String>) -> ShopResult<Self> {
        let field = |key: &str| {
            map.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| ShopError::WebhookParse(format!("missing metadata field {key}")))
        };

        Ok(Self {
            order_id: field(META_ORDER_ID)?,
            user_id: field(META_USER_ID)?,
            manifest: Manifest::from_json(&field(META_PRODUCTS)?)?,
        })
    }
}

/// Request for a hosted payment session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Provider customer id
    pub customer_id: String,
    pub line_items: Vec<SessionLineItem>,
    pub metadata: SessionMetadata,
    /// ISO currency code, lowercase
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A payment session created by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    /// Provider's session ID
    pub session_id: String,
    /// URL to redirect the customer to
    pub checkout_url: String,
    /// Total computed by the provider, in minor units
    pub reported_total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Webhook event types the core distinguishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// Payment succeeded; drives settlement
    PaymentSucceeded,
    /// Anything else; acknowledged and ignored
    Other(String),
}

impl WebhookEventType {
    pub fn name(&self) -> &str {
        match self {
            WebhookEventType::PaymentSucceeded => "payment_intent.succeeded",
            WebhookEventType::Other(name) => name,
        }
    }
}

/// The payment-intent object of a success event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Provider transaction id (`pi_...`)
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A verified, parsed webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event ID from provider
    pub event_id: String,
    pub event_type: WebhookEventType,
    /// Present for success events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent: Option<PaymentIntent>,
    pub timestamp: DateTime<Utc>,
}

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentStrategy: Send + Sync {
    /// Create a hosted payment session for the request.
    async fn create_session(&self, request: &SessionRequest) -> ShopResult<PaymentSession>;

    /// Verify a webhook signature and parse the event.
    ///
    /// # Arguments
    /// * `payload` - Raw webhook body bytes
    /// * `signature` - Signature header from the request
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> ShopResult<WebhookEvent>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a boxed payment strategy (dynamic dispatch)
pub type BoxedPaymentStrategy = Arc<dyn PaymentStrategy>;

/// Redirect targets handed to the provider
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutUrls {
    pub fn new(success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        Self {
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
        }
    }

    /// Derive both pages from a base URL
    pub fn from_base(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self::new(
            format!("{base}/checkout/success"),
            format!("{base}/checkout/cancel"),
        )
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::from_base("http://localhost:8080")
    }
}
