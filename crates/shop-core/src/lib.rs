//! # shop-core
//!
//! Cart, checkout saga and settlement core for the saga-shop backend.
//!
//! This crate provides:
//! - `CartService` and the `CartStore` trait (per-user serialized cart writes)
//! - `CheckoutOrchestrator` turning a cart into a pending order and a
//!   payment session
//! - `SettlementHandler` applying payment confirmations exactly once
//! - `OutboxDispatcher` draining fulfillment events at-least-once
//! - Collaborator traits: `CatalogGateway`, `CustomerDirectory`,
//!   `PaymentStrategy`, `EventPublisher`
//! - `MemoryStore`, an in-process implementation of every store trait
//! - `ShopError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use shop_core::{CheckoutOrchestrator, UserContext};
//!
//! let outcome = orchestrator.checkout(&UserContext::new("u1")).await?;
//! // Redirect the user to outcome.checkout_url
//!
//! // Later, from the provider callback:
//! let event = strategy.verify_webhook(payload, signature).await?;
//! settlement.handle(&event).await?;
//! ```

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod error;
pub mod identity;
pub mod memory;
pub mod order;
pub mod outbox;
pub mod settlement;
pub mod store;
pub mod strategy;

// Re-exports for convenience
pub use cart::{
    AddItem, Cart, CartConversion, CartItem, CartLine, CartService, CartSnapshot, CartStatus,
};
pub use catalog::{bounded, CatalogGateway, ProductSnapshot};
pub use checkout::{
    CheckoutConfig, CheckoutManifest, CheckoutOrchestrator, CheckoutOutcome, CheckoutStep,
};
pub use error::{ErrorKind, ShopError, ShopResult};
pub use identity::{CustomerDirectory, UserContext};
pub use memory::{FailPoint, MemoryStore};
pub use order::{
    check_owner, FulfillmentEvent, Manifest, ManifestLine, NewOrder, Order, OrderItem, OrderStatus,
    PricedLine, SettleOutcome,
};
pub use outbox::{
    DispatcherConfig, DrainReport, EventPublisher, LoggingEventPublisher, OutboxDispatcher,
    OutboxEntry, OutboxMessage, OutboxStatus, FULFILLMENT_TOPIC,
};
pub use settlement::{SettlementAck, SettlementHandler};
pub use store::{CartStore, OrderStore, OutboxStore};
pub use strategy::{
    BoxedPaymentStrategy, CheckoutUrls, PaymentIntent, PaymentSession, PaymentStrategy,
    SessionLineItem, SessionMetadata, SessionRequest, WebhookEvent, WebhookEventType,
};
