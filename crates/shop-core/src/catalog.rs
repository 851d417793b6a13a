//! # Catalog Collaborator
//!
//! Stock and price lookups against the product service, plus the timeout
//! wrapper applied to every outbound collaborator call.

use crate::error::{ShopError, ShopResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Stock, price and provider price reference for one product.
///
/// Fetched fresh at add-to-cart time and again at checkout; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: String,
    pub stock: u32,
    /// Unit price in minor currency units
    #[serde(default)]
    pub price: i64,
    /// Payment provider price reference (`price_...`)
    #[serde(default)]
    pub price_id: Option<String>,
}

impl ProductSnapshot {
    /// Price reference, treating an empty string as absent
    pub fn price_ref(&self) -> Option<&str> {
        self.price_id.as_deref().filter(|p| !p.is_empty())
    }
}

/// Product catalog collaborator
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Current stock/price/price-ref for a product
    async fn snapshot(&self, product_id: &str) -> ShopResult<ProductSnapshot>;
}

/// Run a collaborator call under a deadline.
///
/// A timeout surfaces as [`ShopError::UpstreamTimeout`] and is handled like
/// any other failure of the step.
pub async fn bounded<T, F>(service: &str, limit: Duration, call: F) -> ShopResult<T>
where
    F: Future<Output = ShopResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ShopError::UpstreamTimeout {
            service: service.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
