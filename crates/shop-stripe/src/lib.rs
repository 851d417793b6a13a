//! # shop-stripe
//!
//! Stripe payment strategy for saga-shop.
//!
//! **StripeCheckoutStrategy** implements `shop_core::PaymentStrategy` on top
//! of the Checkout Sessions API:
//! - line items priced by catalog price references
//! - order id, user id and product manifest carried as payment-intent metadata
//! - signed `payment_intent.succeeded` webhooks parsed for settlement
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shop_stripe::StripeCheckoutStrategy;
//! use shop_core::PaymentStrategy;
//!
//! let strategy = StripeCheckoutStrategy::from_env()?;
//! let session = strategy.create_session(&request).await?;
//! // Redirect user to session.checkout_url
//!
//! // In your webhook endpoint:
//! let event = strategy.verify_webhook(payload, signature).await?;
//! ```

pub mod checkout;
pub mod config;
pub mod webhook;

// Re-exports
pub use checkout::StripeCheckoutStrategy;
pub use config::StripeConfig;
pub use webhook::{parse_event, sign_payload, verify_signature, SignatureHeader, PAYMENT_SUCCEEDED};
