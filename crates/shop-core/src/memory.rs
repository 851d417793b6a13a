//! # In-Memory Store
//!
//! Implements every store trait over a single mutex-guarded state. Each trait
//! call stages its writes and applies them only once every check passed, so
//! a failing call leaves the state exactly as it found it. The one mutex
//! stands in for row locks and is stricter than them: it serializes callers
//! across users as well.
//!
//! Used for tests and for running the service without a database.

use crate::cart::{
    AddItem, Cart, CartConversion, CartItem, CartLine, CartSnapshot, CartStatus,
};
use crate::error::{ShopError, ShopResult};
use crate::order::{
    check_owner, FulfillmentEvent, NewOrder, Order, OrderItem, OrderStatus, SettleOutcome,
};
use crate::outbox::{OutboxEntry, OutboxMessage, OutboxStatus};
use crate::store::{CartStore, OrderStore, OutboxStore};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Failure to inject into the next matching write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// `create_order` fails before inserting the item at this index
    OrderItemInsert { index: usize },
    /// `settle_order` fails while writing outbox rows
    OutboxInsert,
}

#[derive(Default)]
struct State {
    next_cart_id: i64,
    next_item_id: i64,
    next_outbox_id: i64,
    carts: Vec<Cart>,
    cart_items: Vec<CartItem>,
    orders: HashMap<String, Order>,
    order_items: Vec<OrderItem>,
    outbox: Vec<OutboxEntry>,
    fail_point: Option<FailPoint>,
}

impl State {
    fn active_cart(&self, user_id: &str) -> Option<&Cart> {
        self.carts
            .iter()
            .find(|c| c.user_id == user_id && c.status == CartStatus::Active)
    }

    fn lines_of(&self, cart_id: i64) -> Vec<CartLine> {
        let mut items: Vec<&CartItem> = self
            .cart_items
            .iter()
            .filter(|ci| ci.cart_id == cart_id)
            .collect();
        items.sort_by_key(|ci| ci.id);
        items
            .into_iter()
            .map(|ci| CartLine::new(ci.product_id.clone(), ci.quantity))
            .collect()
    }

    fn take_fail_point(&mut self, wanted: impl Fn(FailPoint) -> bool) -> bool {
        match self.fail_point {
            Some(point) if wanted(point) => {
                self.fail_point = None;
                true
            }
            _ => false,
        }
    }
}

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot failure for the next matching write
    pub fn inject_failure(&self, point: FailPoint) {
        self.state.lock().fail_point = Some(point);
    }

    /// Every cart of a user, any status
    pub fn carts_for(&self, user_id: &str) -> Vec<Cart> {
        self.state
            .lock()
            .carts
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    pub fn order_item_count(&self) -> usize {
        self.state.lock().order_items.len()
    }

    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.state.lock().outbox.clone()
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn add_item(&self, item: AddItem) -> ShopResult<()> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let cart_id = state.active_cart(&item.user_id).map(|c| c.id);
        let existing = cart_id.and_then(|id| {
            state
                .cart_items
                .iter()
                .position(|ci| ci.cart_id == id && ci.product_id == item.product_id)
        });

        // Validate before touching anything.
        let merged = match existing {
            Some(pos) => state.cart_items[pos]
                .quantity
                .checked_add(item.quantity)
                .ok_or_else(|| ShopError::Validation("quantity overflow".to_string()))?,
            None => item.quantity,
        };
        item.check_stock(merged)?;

        let cart_id = match cart_id {
            Some(id) => id,
            None => {
                state.next_cart_id += 1;
                let id = state.next_cart_id;
                state.carts.push(Cart {
                    id,
                    user_id: item.user_id.clone(),
                    status: CartStatus::Active,
                    created_at: now,
                    updated_at: now,
                });
                id
            }
        };

        match existing {
            Some(pos) => {
                let line = &mut state.cart_items[pos];
                line.quantity = merged;
                line.updated_at = now;
            }
            None => {
                state.next_item_id += 1;
                let id = state.next_item_id;
                state.cart_items.push(CartItem {
                    id,
                    cart_id,
                    product_id: item.product_id.clone(),
                    quantity: merged,
                    created_at: now,
                    updated_at: now,
                });
            }
        }
        Ok(())
    }

    async fn snapshot_active(&self, user_id: &str) -> ShopResult<CartSnapshot> {
        let state = self.state.lock();
        let cart_id = state
            .active_cart(user_id)
            .map(|c| c.id)
            .ok_or_else(|| ShopError::CartNotFound {
                user_id: user_id.to_string(),
            })?;

        Ok(CartSnapshot {
            cart_id,
            lines: state.lines_of(cart_id),
        })
    }

    async fn convert_cart(&self, snapshot: &CartSnapshot) -> ShopResult<CartConversion> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let Some(pos) = state
            .carts
            .iter()
            .position(|c| c.id == snapshot.cart_id && c.status == CartStatus::Active)
        else {
            return Ok(CartConversion::NotActive);
        };
        let user_id = state.carts[pos].user_id.clone();
        let added = snapshot.added_since(&state.lines_of(snapshot.cart_id));

        let cart = &mut state.carts[pos];
        cart.status = CartStatus::Converted;
        cart.updated_at = now;

        if added.is_empty() {
            return Ok(CartConversion::Converted);
        }

        state.next_cart_id += 1;
        let cart_id = state.next_cart_id;
        state.carts.push(Cart {
            id: cart_id,
            user_id,
            status: CartStatus::Active,
            created_at: now,
            updated_at: now,
        });
        for line in &added {
            state.next_item_id += 1;
            let id = state.next_item_id;
            state.cart_items.push(CartItem {
                id,
                cart_id,
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                created_at: now,
                updated_at: now,
            });
        }
        Ok(CartConversion::CarriedOver(added))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, order: &NewOrder) -> ShopResult<()> {
        order.validate()?;
        let mut state = self.state.lock();
        if state.orders.contains_key(&order.id) {
            return Err(ShopError::Store(format!(
                "duplicate key value violates unique constraint: orders.id = {}",
                order.id
            )));
        }

        let now = Utc::now();
        let row = Order {
            id: order.id.clone(),
            user_id: order.user_id.clone(),
            status: OrderStatus::Pending,
            stripe_transaction_id: None,
            total_price: order.total_price,
            created_at: now,
            updated_at: now,
            items: Vec::new(),
        };

        let mut staged = Vec::with_capacity(order.items.len());
        for (index, item) in order.order_items(now)?.into_iter().enumerate() {
            if state.take_fail_point(|p| p == FailPoint::OrderItemInsert { index }) {
                return Err(ShopError::Store(format!(
                    "injected failure inserting order item {index}"
                )));
            }
            staged.push(item);
        }

        state.orders.insert(row.id.clone(), row);
        state.order_items.extend(staged);
        Ok(())
    }

    async fn update_order(
        &self,
        order_id: &str,
        status: OrderStatus,
        provider_transaction_id: &str,
    ) -> ShopResult<()> {
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| ShopError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;

        if !order.status.can_transition_to(status) {
            return Err(order.status.transition_error(order_id, status));
        }
        order.status = status;
        order.stripe_transaction_id = Some(provider_transaction_id.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> ShopResult<Order> {
        let state = self.state.lock();
        let mut order = state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ShopError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;
        order.items = state
            .order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect();
        Ok(order)
    }

    async fn settle_order(
        &self,
        order_id: &str,
        user_id: &str,
        provider_transaction_id: &str,
        events: &[FulfillmentEvent],
    ) -> ShopResult<SettleOutcome> {
        let mut state = self.state.lock();
        let (current, owner) = state
            .orders
            .get(order_id)
            .map(|o| (o.status, o.user_id.clone()))
            .ok_or_else(|| ShopError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;
        check_owner(order_id, &owner, user_id)?;

        match current {
            OrderStatus::Paid => return Ok(SettleOutcome::AlreadyPaid),
            OrderStatus::Canceled => {
                return Err(current.transition_error(order_id, OrderStatus::Paid))
            }
            OrderStatus::Pending => {}
        }

        let messages = events
            .iter()
            .map(OutboxMessage::fulfillment)
            .collect::<ShopResult<Vec<_>>>()?;
        if state.take_fail_point(|p| p == FailPoint::OutboxInsert) {
            return Err(ShopError::Store("injected failure inserting outbox row".to_string()));
        }

        let now = Utc::now();
        for message in messages {
            state.next_outbox_id += 1;
            let id = state.next_outbox_id;
            state.outbox.push(OutboxEntry {
                id,
                topic: message.topic,
                key: message.key,
                payload: message.payload,
                status: OutboxStatus::Pending,
                attempts: 0,
                last_error: None,
                created_at: now,
            });
        }

        if let Some(order) = state.orders.get_mut(order_id) {
            order.status = OrderStatus::Paid;
            order.stripe_transaction_id = Some(provider_transaction_id.to_string());
            order.updated_at = now;
        }
        Ok(SettleOutcome::Transitioned)
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn claim_pending(&self, limit: usize) -> ShopResult<Vec<OutboxEntry>> {
        let state = self.state.lock();
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: i64) -> ShopResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ShopError::Store(format!("outbox entry {id} not found")))?;
        entry.status = OutboxStatus::Published;
        entry.attempts += 1;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str, max_attempts: u32) -> ShopResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ShopError::Store(format!("outbox entry {id} not found")))?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        if entry.attempts >= max_attempts {
            entry.status = OutboxStatus::Failed;
        }
        Ok(())
    }
}
