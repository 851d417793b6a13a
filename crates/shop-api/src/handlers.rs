//! # Request Handlers
//!
//! Axum request handlers for cart, checkout, order and webhook endpoints.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use shop_core::{CartLine, Order, SettlementAck, ShopError, UserContext};
use tracing::{error, info, instrument, warn};

/// Header carrying the authenticated user id, set by the gateway
pub const USER_ID_HEADER: &str = "x-user-id";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Add-to-cart request
#[derive(Debug, Deserialize)]
pub struct AddCartItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

/// Cart contents response
#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub items: Vec<CartLine>,
}

/// Checkout response
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    /// Redirect the user here
    pub checkout_session_url: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn shop_error_to_response(err: ShopError) -> ApiError {
    let code = err.status_code();
    if code >= 500 {
        error!(kind = ?err.kind(), "request failed: {}", err);
    }
    let response = ErrorResponse::new(err.to_string(), code);
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

/// Caller identity established by the upstream gateway
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserContext);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse::new("Missing X-User-Id header", 401)),
                )
            })?;

        let mut user = UserContext::new(user_id);
        if let Some(auth) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            user = user.with_authorization(auth);
        }
        Ok(Self(user))
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "saga-shop",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Add a product to the caller's active cart
#[instrument(skip(state, user, request), fields(user_id = %user.0.user_id, product_id = %request.product_id))]
pub async fn add_cart_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<AddCartItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .carts
        .add_item(&user.0.user_id, &request.product_id, request.quantity)
        .await
        .map_err(shop_error_to_response)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message": "Product added to cart" })),
    ))
}

/// Read the caller's active cart
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<CartResponse>, ApiError> {
    let items = state
        .carts
        .active_items(&user.0.user_id)
        .await
        .map_err(shop_error_to_response)?;
    Ok(Json(CartResponse { items }))
}

/// Cart snapshot for other services
pub async fn internal_cart_items(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let items = state
        .carts
        .active_items(&user_id)
        .await
        .map_err(shop_error_to_response)?;
    Ok(Json(CartResponse { items }))
}

/// Run the checkout saga for the caller
#[instrument(skip(state, user), fields(user_id = %user.0.user_id))]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let outcome = state
        .checkout
        .checkout(&user.0)
        .await
        .map_err(shop_error_to_response)?;

    Ok(Json(CheckoutResponse {
        order_id: outcome.order_id,
        checkout_session_url: outcome.checkout_url,
    }))
}

/// Read one of the caller's orders
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .orders
        .get_order(&order_id)
        .await
        .map_err(shop_error_to_response)?;

    // Someone else's order is reported as missing.
    if order.user_id != user.0.user_id {
        return Err(shop_error_to_response(ShopError::OrderNotFound { order_id }));
    }
    Ok(Json(order))
}

/// Stripe webhook handler
#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Missing Stripe-Signature header", 400)),
            )
        })?;

    let event = state
        .payments
        .verify_webhook(&body, signature)
        .await
        .map_err(|e| {
            warn!("Webhook verification failed: {}", e);
            shop_error_to_response(e)
        })?;

    info!(
        "Received webhook: type={}, id={}",
        event.event_type.name(),
        event.event_id
    );

    let ack = state
        .settlement
        .handle(&event)
        .await
        .map_err(shop_error_to_response)?;

    let body = match ack {
        SettlementAck::Ignored { event_type } => serde_json::json!({
            "message": "Event type not handled",
            "event": event_type,
        }),
        SettlementAck::Settled { order_id, .. } => serde_json::json!({
            "message": "Order marked as paid",
            "order_id": order_id,
        }),
        SettlementAck::Duplicate { order_id } => serde_json::json!({
            "message": "Order already paid",
            "order_id": order_id,
        }),
    };
    Ok((StatusCode::OK, Json(body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new("Test error", 400);
        assert_eq!(err.error, "Test error");
        assert_eq!(err.code, 400);
    }

    #[test]
    fn test_shop_error_conversion() {
        let (status, json) = shop_error_to_response(ShopError::InsufficientStock {
            product_id: "p1".into(),
            requested: 4,
            available: 2,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json.0.code, 409);

        let (status, _) = shop_error_to_response(ShopError::UpstreamTimeout {
            service: "catalog".into(),
            timeout_ms: 5000,
        });
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }
}
