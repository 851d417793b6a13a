//! # shop-api
//!
//! HTTP API layer for saga-shop-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - REST endpoints for cart, checkout and orders
//! - The Stripe settlement webhook
//! - HTTP clients for the catalog, identity and event-bridge services
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/api/v1/cart/items` | Add to cart |
//! | GET | `/api/v1/cart/items` | Active cart |
//! | POST | `/api/v1/checkout` | Create order and payment session |
//! | GET | `/api/v1/orders/{order_id}` | Own order |
//! | GET | `/internal/v1/carts/{user_id}/items` | Cart snapshot |
//! | POST | `/webhook/stripe` | Stripe webhook |

pub mod clients;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState, Collaborators, Stores};
