//! # Cart Types
//!
//! Cart rows, cart lines and the caller-facing add-to-cart service.

use crate::catalog::{bounded, CatalogGateway};
use crate::error::{ShopError, ShopResult};
use crate::store::CartStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Lifecycle of a cart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    /// Accepting modifications; at most one per user
    Active,
    /// An order was created from this cart
    Converted,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CartStatus::Active => "active",
            CartStatus::Converted => "converted",
        }
    }

    pub fn parse(s: &str) -> ShopResult<Self> {
        match s {
            "active" => Ok(CartStatus::Active),
            "converted" => Ok(CartStatus::Converted),
            other => Err(ShopError::Store(format!("unknown cart status: {other}"))),
        }
    }
}

/// A persisted cart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub id: i64,
    pub user_id: String,
    pub status: CartStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted cart line. Unique on `(cart_id, product_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub id: i64,
    pub cart_id: i64,
    pub product_id: String,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The `(product, quantity)` view of a cart line handed to other services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// The active cart as read at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSnapshot {
    pub cart_id: i64,
    /// Lines in insertion order
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    /// What `current` holds beyond this snapshot: new products, and the
    /// growth of products already present.
    pub fn added_since(&self, current: &[CartLine]) -> Vec<CartLine> {
        current
            .iter()
            .filter_map(|line| {
                let seen = self
                    .lines
                    .iter()
                    .find(|l| l.product_id == line.product_id)
                    .map_or(0, |l| l.quantity);
                (line.quantity > seen)
                    .then(|| CartLine::new(line.product_id.clone(), line.quantity - seen))
            })
            .collect()
    }
}

/// Result of [`CartStore::convert_cart`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartConversion {
    /// The cart held exactly the snapshot and is now `converted`
    Converted,
    /// The cart was converted; lines added after the snapshot now sit in a
    /// fresh active cart
    CarriedOver(Vec<CartLine>),
    /// The snapshot's cart was no longer active
    NotActive,
}

/// Input for [`CartStore::add_item`]
#[derive(Debug, Clone)]
pub struct AddItem {
    pub user_id: String,
    pub product_id: String,
    pub quantity: u32,
    /// Stock figure read from the catalog just before the call
    pub known_stock: u32,
    /// Provider price reference read alongside the stock
    pub price_ref: Option<String>,
}

impl AddItem {
    /// Validate a merged (or fresh) line quantity against the known stock
    pub fn check_stock(&self, total: u32) -> ShopResult<()> {
        if total > self.known_stock {
            return Err(ShopError::InsufficientStock {
                product_id: self.product_id.clone(),
                requested: total,
                available: self.known_stock,
            });
        }
        Ok(())
    }
}

/// Add-to-cart and read-cart operations as seen by callers.
///
/// Fetches a fresh catalog snapshot for every add so the store can validate
/// the merged quantity against current stock. The check is advisory: nothing
/// is reserved, and two carts can both hold the last unit.
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CartStore>,
    catalog: Arc<dyn CatalogGateway>,
    upstream_timeout: Duration,
}

impl CartService {
    pub fn new(
        store: Arc<dyn CartStore>,
        catalog: Arc<dyn CatalogGateway>,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            upstream_timeout,
        }
    }

    /// Add `quantity` units of a product to the user's active cart
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn add_item(&self, user_id: &str, product_id: &str, quantity: u32) -> ShopResult<()> {
        if product_id.trim().is_empty() {
            return Err(ShopError::Validation("product_id must not be empty".to_string()));
        }
        if quantity == 0 {
            return Err(ShopError::Validation("quantity must be positive".to_string()));
        }

        let snapshot = bounded(
            "catalog",
            self.upstream_timeout,
            self.catalog.snapshot(product_id),
        )
        .await?;

        if quantity > snapshot.stock {
            warn!(
                requested = quantity,
                available = snapshot.stock,
                "insufficient stock"
            );
            return Err(ShopError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: quantity,
                available: snapshot.stock,
            });
        }

        self.store
            .add_item(AddItem {
                user_id: user_id.to_string(),
                product_id: product_id.to_string(),
                quantity,
                known_stock: snapshot.stock,
                price_ref: snapshot.price_id,
            })
            .await?;

        info!(quantity, "product added to cart");
        Ok(())
    }

    /// Lines of the user's active cart, in insertion order
    pub async fn active_items(&self, user_id: &str) -> ShopResult<Vec<CartLine>> {
        self.store.get_active_items(user_id).await
    }
}
