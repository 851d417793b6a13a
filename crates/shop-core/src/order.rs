//! # Order Types
//!
//! Orders, order items, the checkout manifest and fulfillment events.

use crate::error::{ShopError, ShopResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle. `Paid` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created at checkout, awaiting settlement
    Pending,
    /// Settlement confirmed the payment
    Paid,
    /// Abandoned or refused
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> ShopResult<Self> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "canceled" => Ok(OrderStatus::Canceled),
            other => Err(ShopError::Store(format!("unknown order status: {other}"))),
        }
    }

    /// Only pending→paid and pending→canceled are legal
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid) | (OrderStatus::Pending, OrderStatus::Canceled)
        )
    }

    /// Error for an illegal `self -> next` move
    pub fn transition_error(&self, order_id: &str, next: OrderStatus) -> ShopError {
        ShopError::InvalidTransition {
            order_id: order_id.to_string(),
            from: self.as_str().to_string(),
            to: next.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted order with its items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Caller-generated id; the sole correlation key with the provider
    pub id: String,
    pub user_id: String,
    pub status: OrderStatus,
    /// Provider payment id, set once paid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_transaction_id: Option<String>,
    /// Minor currency units, as reported by the payment session
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Sum of the item totals
    pub fn items_total(&self) -> i64 {
        self.items
            .iter()
            .fold(0i64, |acc, i| acc.saturating_add(i.total_price))
    }
}

/// Reject a settlement whose payer does not own the order
pub fn check_owner(order_id: &str, owner: &str, claimed: &str) -> ShopResult<()> {
    if owner != claimed {
        return Err(ShopError::WebhookParse(format!(
            "order {order_id} does not belong to user {claimed}"
        )));
    }
    Ok(())
}

/// A persisted order line; immutable after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub price_per_unit: i64,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
}

/// A cart line resolved against the catalog at checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: String,
    pub quantity: u32,
    pub price_per_unit: i64,
}

impl PricedLine {
    /// `price_per_unit * quantity`, or `None` on overflow
    pub fn total(&self) -> Option<i64> {
        self.price_per_unit.checked_mul(i64::from(self.quantity))
    }
}

/// Input for [`crate::store::OrderStore::create_order`]
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: String,
    pub user_id: String,
    pub items: Vec<PricedLine>,
    pub total_price: i64,
}

impl NewOrder {
    /// Generate a fresh order id
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn validate(&self) -> ShopResult<()> {
        if self.items.is_empty() {
            return Err(ShopError::Validation(format!(
                "order {} has no items",
                self.id
            )));
        }
        if let Some(bad) = self.items.iter().find(|i| i.quantity == 0) {
            return Err(ShopError::Validation(format!(
                "order {} has zero quantity for {}",
                self.id, bad.product_id
            )));
        }
        if let Some(bad) = self
            .items
            .iter()
            .find(|i| i.price_per_unit < 0 || i.total().is_none())
        {
            return Err(ShopError::Validation(format!(
                "order {} has an invalid price for {}",
                self.id, bad.product_id
            )));
        }
        Ok(())
    }

    /// Materialize the rows written for this order
    pub fn order_items(&self, created_at: DateTime<Utc>) -> ShopResult<Vec<OrderItem>> {
        self.items
            .iter()
            .map(|line| {
                let total_price = line.total().ok_or_else(|| {
                    ShopError::Validation(format!("line total overflows for {}", line.product_id))
                })?;
                Ok(OrderItem {
                    id: Uuid::new_v4().to_string(),
                    order_id: self.id.clone(),
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    price_per_unit: line.price_per_unit,
                    total_price,
                    created_at,
                })
            })
            .collect()
    }
}

/// One frozen `(product, quantity)` pair of a checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLine {
    pub product_id: String,
    pub quantity: u32,
}

/// What was purchased, captured at checkout and carried through the payment
/// provider as metadata. Settlement reads this instead of the cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(pub Vec<ManifestLine>);

impl Manifest {
    pub fn from_lines(lines: &[PricedLine]) -> Self {
        Manifest(
            lines
                .iter()
                .map(|l| ManifestLine {
                    product_id: l.product_id.clone(),
                    quantity: l.quantity,
                })
                .collect(),
        )
    }

    pub fn to_json(&self) -> ShopResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> ShopResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| ShopError::WebhookParse(format!("invalid products manifest: {e}")))
    }

    pub fn lines(&self) -> &[ManifestLine] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One fulfillment event per manifest line, all stamped `at`
    pub fn fulfillment_events(&self, order_id: &str, at: DateTime<Utc>) -> Vec<FulfillmentEvent> {
        self.0
            .iter()
            .map(|line| FulfillmentEvent {
                order_id: order_id.to_string(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                created_at: at,
            })
            .collect()
    }
}

/// Published downstream once per purchased line, keyed by `order_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentEvent {
    pub order_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

/// Result of a settlement attempt against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// pending→paid committed together with the outbox rows
    Transitioned,
    /// A previous delivery already settled the order; nothing written
    AlreadyPaid,
}
