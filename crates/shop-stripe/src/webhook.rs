//! # Stripe Webhook Verification
//!
//! Stripe signs each delivery with `Stripe-Signature: t=<unix>,v1=<hex>[,v1=...]`
//! where every `v1` is HMAC-SHA256 over `"<t>.<raw body>"` keyed by the
//! endpoint secret. Only `payment_intent.succeeded` carries a payload the
//! core acts on; other event types are parsed just far enough to be named.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use shop_core::{PaymentIntent, ShopError, ShopResult, WebhookEvent, WebhookEventType};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Stripe's name for the event that drives settlement
pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> ShopResult<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            ShopError::WebhookVerificationFailed("Missing timestamp in signature".to_string())
        })?;

        if signatures.is_empty() {
            return Err(ShopError::WebhookVerificationFailed(
                "No v1 signature found".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn keyed_mac(secret: &str, timestamp: i64, payload: &[u8]) -> ShopResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ShopError::WebhookVerificationFailed(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Hex signature Stripe would send for `payload` at `timestamp`
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> ShopResult<String> {
    let mac = keyed_mac(secret, timestamp, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check the signature header against the raw body.
///
/// Any one matching `v1` entry is enough. Comparison is constant-time.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> ShopResult<()> {
    let parsed = SignatureHeader::parse(header)?;

    if (now.timestamp() - parsed.timestamp).abs() > tolerance_secs {
        return Err(ShopError::WebhookVerificationFailed(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let mac = keyed_mac(secret, parsed.timestamp, payload)?;
    let valid = parsed.signatures.iter().any(|sig| match hex::decode(sig) {
        Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
        Err(_) => false,
    });

    if !valid {
        return Err(ShopError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StripeEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

/// Parse a verified body into the core event shape
pub fn parse_event(payload: &[u8]) -> ShopResult<WebhookEvent> {
    let envelope: StripeEnvelope = serde_json::from_slice(payload)
        .map_err(|e| ShopError::WebhookParse(format!("Failed to parse webhook: {}", e)))?;

    debug!(event_id = %envelope.id, event_type = %envelope.event_type, "parsed Stripe event");

    let (event_type, payment_intent) = if envelope.event_type == PAYMENT_SUCCEEDED {
        let intent: PaymentIntent = serde_json::from_value(envelope.data.object).map_err(|e| {
            ShopError::WebhookParse(format!("Failed to parse payment intent: {}", e))
        })?;
        (WebhookEventType::PaymentSucceeded, Some(intent))
    } else {
        (WebhookEventType::Other(envelope.event_type), None)
    };

    Ok(WebhookEvent {
        event_id: envelope.id,
        event_type,
        payment_intent,
        timestamp: DateTime::from_timestamp(envelope.created, 0).unwrap_or_else(Utc::now),
    })
}
