//! # Checkout Saga
//!
//! Turns "the current cart of user X" into one pending order plus a payment
//! session the user can complete. Steps run strictly in sequence:
//!
//! ```text
//!  1 resolve customer ─► 2 load cart ─► 3 price items ─► 4 validate
//!       ─► 5 create payment session ─► 6 persist order ─► 7 convert cart
//! ```
//!
//! A failure in steps 1 to 5 leaves nothing behind. A failure in step 6 leaves a
//! payment session at the provider with no order row; it is surfaced as
//! [`ShopError::OrphanedPaymentSession`] for reconciliation. Step 7 is
//! best-effort: the order is already durable. It converts the cart read in
//! step 2, not whatever cart is active by then; lines added while the session
//! was being created end up in a fresh active cart.
//!
//! Stock checks here are advisory. Nothing is reserved between add-to-cart
//! and checkout, so two users can both buy the last unit.

use crate::catalog::{bounded, CatalogGateway, ProductSnapshot};
use crate::cart::{CartConversion, CartLine};
use crate::error::{ShopError, ShopResult};
use crate::identity::{CustomerDirectory, UserContext};
use crate::order::{Manifest, NewOrder, PricedLine};
use crate::store::{CartStore, OrderStore};
use crate::strategy::{
    BoxedPaymentStrategy, CheckoutUrls, SessionLineItem, SessionMetadata, SessionRequest,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Saga step, used to label failures in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStep {
    ResolveCustomer,
    LoadCart,
    PriceItems,
    Validate,
    CreateSession,
    PersistOrder,
    ConvertCart,
}

impl CheckoutStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStep::ResolveCustomer => "resolve_customer",
            CheckoutStep::LoadCart => "load_cart",
            CheckoutStep::PriceItems => "price_items",
            CheckoutStep::Validate => "validate",
            CheckoutStep::CreateSession => "create_session",
            CheckoutStep::PersistOrder => "persist_order",
            CheckoutStep::ConvertCart => "convert_cart",
        }
    }
}

/// Checkout configuration, fixed at construction
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub urls: CheckoutUrls,
    /// Lowercase ISO currency code for sessions
    pub currency: String,
    /// Bound applied to every collaborator call
    pub upstream_timeout: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            urls: CheckoutUrls::default(),
            currency: "inr".to_string(),
            upstream_timeout: Duration::from_secs(5),
        }
    }
}

/// What the caller gets back from a successful checkout
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order_id: String,
    pub session_id: String,
    /// Redirect the customer here
    pub checkout_url: String,
    pub total_price: i64,
}

/// Validated, priced checkout contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutManifest {
    pub lines: Vec<PricedLine>,
    pub session_items: Vec<SessionLineItem>,
    total: i64,
}

impl CheckoutManifest {
    /// Pair cart lines with fresh snapshots and reject anything unsellable.
    ///
    /// Every line needs `quantity <= stock`, a non-negative price and a price
    /// reference, and the totals must fit in an `i64`. The first violation
    /// aborts the whole checkout.
    pub fn build(cart: &[CartLine], snapshots: &[ProductSnapshot]) -> ShopResult<Self> {
        if cart.is_empty() {
            return Err(ShopError::Validation("cart is empty".to_string()));
        }

        let mut lines = Vec::with_capacity(cart.len());
        let mut session_items = Vec::with_capacity(cart.len());
        let mut total: i64 = 0;

        for (line, snapshot) in cart.iter().zip(snapshots) {
            if line.quantity > snapshot.stock {
                return Err(ShopError::InvalidCartItem {
                    product_id: line.product_id.clone(),
                    reason: format!(
                        "requested {}, available {}",
                        line.quantity, snapshot.stock
                    ),
                });
            }
            let price_ref = snapshot.price_ref().ok_or_else(|| ShopError::InvalidCartItem {
                product_id: line.product_id.clone(),
                reason: "missing price reference".to_string(),
            })?;
            if snapshot.price < 0 {
                return Err(ShopError::InvalidCartItem {
                    product_id: line.product_id.clone(),
                    reason: format!("negative price {}", snapshot.price),
                });
            }

            let priced = PricedLine {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                price_per_unit: snapshot.price,
            };
            total = priced
                .total()
                .and_then(|line_total| total.checked_add(line_total))
                .ok_or_else(|| ShopError::InvalidCartItem {
                    product_id: line.product_id.clone(),
                    reason: "price total out of range".to_string(),
                })?;
            lines.push(priced);
            session_items.push(SessionLineItem {
                price_ref: price_ref.to_string(),
                quantity: line.quantity,
            });
        }

        Ok(Self {
            lines,
            session_items,
            total,
        })
    }

    /// Locally computed total
    pub fn local_total(&self) -> i64 {
        self.total
    }

    pub fn manifest(&self) -> Manifest {
        Manifest::from_lines(&self.lines)
    }
}

/// Drives the checkout saga
pub struct CheckoutOrchestrator {
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn CatalogGateway>,
    customers: Arc<dyn CustomerDirectory>,
    payments: BoxedPaymentStrategy,
    config: CheckoutConfig,
}

impl CheckoutOrchestrator {
    pub fn new(
        carts: Arc<dyn CartStore>,
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn CatalogGateway>,
        customers: Arc<dyn CustomerDirectory>,
        payments: BoxedPaymentStrategy,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            carts,
            orders,
            catalog,
            customers,
            payments,
            config,
        }
    }

    /// Run the saga for the caller's active cart
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn checkout(&self, user: &UserContext) -> ShopResult<CheckoutOutcome> {
        let limit = self.config.upstream_timeout;

        let customer_id = bounded(
            "identity",
            limit,
            self.customers.payment_customer_id(user),
        )
        .await
        .and_then(|id| {
            if id.is_empty() {
                Err(ShopError::upstream("identity", "empty payment customer id"))
            } else {
                Ok(id)
            }
        })
        .map_err(|e| abort(CheckoutStep::ResolveCustomer, e))?;

        let cart = self
            .carts
            .snapshot_active(&user.user_id)
            .await
            .map_err(|e| abort(CheckoutStep::LoadCart, e))?;

        let mut snapshots = Vec::with_capacity(cart.lines.len());
        for line in &cart.lines {
            let snapshot = bounded("catalog", limit, self.catalog.snapshot(&line.product_id))
                .await
                .map_err(|e| abort(CheckoutStep::PriceItems, e))?;
            snapshots.push(snapshot);
        }

        let manifest = CheckoutManifest::build(&cart.lines, &snapshots)
            .map_err(|e| abort(CheckoutStep::Validate, e))?;

        let order_id = NewOrder::generate_id();
        let request = SessionRequest {
            customer_id,
            line_items: manifest.session_items.clone(),
            metadata: SessionMetadata {
                order_id: order_id.clone(),
                user_id: user.user_id.clone(),
                manifest: manifest.manifest(),
            },
            currency: self.config.currency.clone(),
            success_url: self.config.urls.success_url.clone(),
            cancel_url: self.config.urls.cancel_url.clone(),
        };

        let session = bounded(
            self.payments.provider_name(),
            limit,
            self.payments.create_session(&request),
        )
        .await
        .map_err(|e| abort(CheckoutStep::CreateSession, e))?;

        let local_total = manifest.local_total();
        if session.reported_total != local_total {
            // Provider total wins; drift usually means a stale catalog price.
            warn!(
                order_id = %order_id,
                reported_total = session.reported_total,
                local_total,
                "payment session total differs from catalog total"
            );
        }

        let order = NewOrder {
            id: order_id.clone(),
            user_id: user.user_id.clone(),
            items: manifest.lines,
            total_price: session.reported_total,
        };

        if let Err(e) = self.orders.create_order(&order).await {
            error!(
                step = CheckoutStep::PersistOrder.as_str(),
                order_id = %order_id,
                session_id = %session.session_id,
                "order not recorded for live payment session, reconciliation required: {}",
                e
            );
            return Err(ShopError::OrphanedPaymentSession {
                order_id,
                session_id: session.session_id,
                source: Box::new(e),
            });
        }

        match self.carts.convert_cart(&cart).await {
            Ok(CartConversion::Converted) => {}
            Ok(CartConversion::CarriedOver(lines)) => info!(
                step = CheckoutStep::ConvertCart.as_str(),
                order_id = %order_id,
                carried = lines.len(),
                "lines added during checkout kept in a fresh cart"
            ),
            Ok(CartConversion::NotActive) => warn!(
                step = CheckoutStep::ConvertCart.as_str(),
                order_id = %order_id,
                cart_id = cart.cart_id,
                "cart already converted by another checkout"
            ),
            Err(e) => warn!(
                step = CheckoutStep::ConvertCart.as_str(),
                order_id = %order_id,
                "cart left active after checkout: {}",
                e
            ),
        }

        info!(
            order_id = %order_id,
            session_id = %session.session_id,
            total_price = session.reported_total,
            items = order.items.len(),
            "checkout created pending order"
        );

        Ok(CheckoutOutcome {
            order_id,
            session_id: session.session_id,
            checkout_url: session.checkout_url,
            total_price: session.reported_total,
        })
    }
}

fn abort(step: CheckoutStep, err: ShopError) -> ShopError {
    warn!(step = step.as_str(), "checkout aborted, nothing persisted: {}", err);
    err
}
