//! # Routes
//!
//! Axum router configuration for the shop API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Largest webhook body accepted
pub const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;

/// Create the main application router
///
/// Routes:
/// - GET  /health
/// - POST /api/v1/cart/items - Add to cart
/// - GET  /api/v1/cart/items - Active cart
/// - POST /api/v1/checkout - Checkout saga
/// - GET  /api/v1/orders/{order_id} - Own order
/// - GET  /internal/v1/carts/{user_id}/items - Cart snapshot for other services
/// - POST /webhook/stripe - Stripe webhook handler
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/cart/items",
            post(handlers::add_cart_item).get(handlers::get_cart),
        )
        .route("/checkout", post(handlers::checkout))
        .route("/orders/{order_id}", get(handlers::get_order));

    let internal_routes =
        Router::new().route("/carts/{user_id}/items", get(handlers::internal_cart_items));

    // Webhook routes (no CORS, raw body, bounded size)
    let webhook_routes = Router::new()
        .route("/stripe", post(handlers::stripe_webhook))
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes.layer(cors))
        .nest("/internal/v1", internal_routes)
        .nest("/webhook", webhook_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
