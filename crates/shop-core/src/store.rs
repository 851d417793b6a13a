//! # Store Traits
//!
//! Transactional persistence seams. Each public method begins, executes and
//! commits (or rolls back) exactly one transaction; no transaction outlives a
//! call.

use crate::cart::{AddItem, CartConversion, CartLine, CartSnapshot};
use crate::error::ShopResult;
use crate::order::{FulfillmentEvent, NewOrder, Order, OrderStatus, SettleOutcome};
use crate::outbox::OutboxEntry;
use async_trait::async_trait;

/// Cart and cart-item persistence with per-user serialization
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Merge a line into the user's active cart, creating the cart if absent.
    ///
    /// Holds the cart row lock for the whole transaction so concurrent adds
    /// for the same user run one after another. Fails with
    /// `InsufficientStock` when the new or merged quantity exceeds
    /// `known_stock`; nothing is written in that case.
    async fn add_item(&self, item: AddItem) -> ShopResult<()>;

    /// Id and lines of the active cart in insertion order, read under the
    /// cart lock. `CartNotFound` when the user has no active cart.
    async fn snapshot_active(&self, user_id: &str) -> ShopResult<CartSnapshot>;

    /// Lines of the active cart in insertion order
    async fn get_active_items(&self, user_id: &str) -> ShopResult<Vec<CartLine>> {
        Ok(self.snapshot_active(user_id).await?.lines)
    }

    /// Flip the snapshot's cart to `converted` if it is still active.
    ///
    /// Runs under the cart lock. Anything added after `snapshot` was taken
    /// is moved into a fresh active cart in the same transaction, so no
    /// line is lost to the conversion.
    async fn convert_cart(&self, snapshot: &CartSnapshot) -> ShopResult<CartConversion>;
}

/// Order and order-item persistence
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a pending order and all of its items atomically
    async fn create_order(&self, order: &NewOrder) -> ShopResult<()>;

    /// Move an order to `status`. Zero matched rows is `OrderNotFound`; a
    /// move out of a terminal state is `InvalidTransition`.
    async fn update_order(
        &self,
        order_id: &str,
        status: OrderStatus,
        provider_transaction_id: &str,
    ) -> ShopResult<()>;

    /// Order with its items
    async fn get_order(&self, order_id: &str) -> ShopResult<Order>;

    /// Check-then-transition to `paid` in one transaction, writing `events`
    /// to the outbox in that same transaction. A repeat delivery for an
    /// already paid order writes nothing and returns `AlreadyPaid`. The order
    /// must belong to `user_id`.
    async fn settle_order(
        &self,
        order_id: &str,
        user_id: &str,
        provider_transaction_id: &str,
        events: &[FulfillmentEvent],
    ) -> ShopResult<SettleOutcome>;
}

/// Durable queue of outbound fulfillment events
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Pending entries in sequence order, at most `limit`
    async fn claim_pending(&self, limit: usize) -> ShopResult<Vec<OutboxEntry>>;

    async fn mark_published(&self, id: i64) -> ShopResult<()>;

    /// Record a failed attempt; parks the entry once `max_attempts` is hit
    async fn mark_failed(&self, id: i64, error: &str, max_attempts: u32) -> ShopResult<()>;
}
