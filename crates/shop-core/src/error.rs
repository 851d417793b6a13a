//! # Shop Error Types
//!
//! Typed error handling for the cart, checkout and settlement core.
//! All operations return `Result<T, ShopError>`.

use thiserror::Error;

/// Caller-facing error category.
///
/// Every [`ShopError`] variant falls into exactly one category, which decides
/// how the transport layer answers and whether a retry can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape or values; retrying the same request cannot succeed
    Validation,
    /// No active cart, unknown order or product
    NotFound,
    /// Insufficient stock or an illegal order transition
    Conflict,
    /// A collaborator timed out or answered with a non-success status
    UpstreamUnavailable,
    /// Transactional persistence failed; nothing was applied
    StoreFailure,
}

/// Core error type for all shop operations
#[derive(Debug, Error)]
pub enum ShopError {
    /// Invalid request data
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The user has no active cart
    #[error("No active cart found for user: {user_id}")]
    CartNotFound { user_id: String },

    /// Unknown order id
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: String },

    /// Product unknown to the catalog
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: String },

    /// Requested quantity exceeds the advisory stock figure
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    /// A cart line cannot be sold at checkout (e.g. no price reference)
    #[error("Invalid item in cart: {product_id} ({reason})")]
    InvalidCartItem { product_id: String, reason: String },

    /// Order status change outside pending→paid / pending→canceled
    #[error("Invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: String,
        from: String,
        to: String,
    },

    /// Collaborating service answered with a failure
    #[error("Upstream error [{service}]: {message}")]
    Upstream { service: String, message: String },

    /// Collaborating service did not answer within the configured bound
    #[error("Upstream timeout [{service}] after {timeout_ms} ms")]
    UpstreamTimeout { service: String, timeout_ms: u64 },

    /// Payment provider API error
    #[error("Provider error [{provider}]: {message}")]
    Provider { provider: String, message: String },

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload or metadata could not be parsed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Persistence error; the enclosing transaction was rolled back
    #[error("Store failure: {0}")]
    Store(String),

    /// A payment session exists at the provider but the order row could not
    /// be written. Needs operational reconciliation.
    #[error("Payment session {session_id} created but order {order_id} was not recorded: {source}")]
    OrphanedPaymentSession {
        order_id: String,
        session_id: String,
        #[source]
        source: Box<ShopError>,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShopError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShopError::Validation(_)
            | ShopError::WebhookVerificationFailed(_)
            | ShopError::WebhookParse(_) => ErrorKind::Validation,
            ShopError::CartNotFound { .. }
            | ShopError::OrderNotFound { .. }
            | ShopError::ProductNotFound { .. } => ErrorKind::NotFound,
            ShopError::InsufficientStock { .. }
            | ShopError::InvalidCartItem { .. }
            | ShopError::InvalidTransition { .. } => ErrorKind::Conflict,
            ShopError::Upstream { .. }
            | ShopError::UpstreamTimeout { .. }
            | ShopError::Provider { .. } => ErrorKind::UpstreamUnavailable,
            ShopError::Store(_)
            | ShopError::OrphanedPaymentSession { .. }
            | ShopError::Configuration(_)
            | ShopError::Serialization(_)
            | ShopError::Internal(_) => ErrorKind::StoreFailure,
        }
    }

    /// Returns true if this error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UpstreamUnavailable | ErrorKind::StoreFailure
        ) && !matches!(self, ShopError::Configuration(_))
    }

    /// True when an external side effect exists that no local row records.
    pub fn left_external_side_effect(&self) -> bool {
        matches!(self, ShopError::OrphanedPaymentSession { .. })
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ShopError::Validation(_) => 400,
            ShopError::WebhookParse(_) => 400,
            ShopError::WebhookVerificationFailed(_) => 401,
            ShopError::CartNotFound { .. } => 404,
            ShopError::OrderNotFound { .. } => 404,
            ShopError::ProductNotFound { .. } => 404,
            ShopError::InsufficientStock { .. } => 409,
            ShopError::InvalidCartItem { .. } => 409,
            ShopError::InvalidTransition { .. } => 409,
            ShopError::Upstream { .. } => 502,
            ShopError::Provider { .. } => 502,
            ShopError::UpstreamTimeout { .. } => 504,
            ShopError::Store(_) => 500,
            ShopError::OrphanedPaymentSession { .. } => 500,
            ShopError::Configuration(_) => 500,
            ShopError::Serialization(_) => 500,
            ShopError::Internal(_) => 500,
        }
    }

    /// Shorthand for [`ShopError::Upstream`]
    pub fn upstream(service: &str, message: impl Into<String>) -> Self {
        ShopError::Upstream {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ShopError {
    fn from(err: serde_json::Error) -> Self {
        ShopError::Serialization(err.to_string())
    }
}

/// Result type alias for shop operations
pub type ShopResult<T> = Result<T, ShopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ShopError::InsufficientStock {
                product_id: "p1".into(),
                requested: 7,
                available: 5
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ShopError::CartNotFound {
                user_id: "u1".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ShopError::UpstreamTimeout {
                service: "catalog".into(),
                timeout_ms: 50
            }
            .kind(),
            ErrorKind::UpstreamUnavailable
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ShopError::upstream("catalog", "502 Bad Gateway").is_retryable());
        assert!(ShopError::Store("connection reset".into()).is_retryable());
        assert!(!ShopError::Validation("quantity must be positive".into()).is_retryable());
        assert!(!ShopError::Configuration("missing key".into()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ShopError::Validation("x".into()).status_code(), 400);
        assert_eq!(
            ShopError::OrderNotFound {
                order_id: "o1".into()
            }
            .status_code(),
            404
        );
        assert_eq!(
            ShopError::InvalidCartItem {
                product_id: "p1".into(),
                reason: "missing price reference".into()
            }
            .status_code(),
            409
        );
    }

    #[test]
    fn test_orphaned_session_is_flagged() {
        let err = ShopError::OrphanedPaymentSession {
            order_id: "o1".into(),
            session_id: "cs_1".into(),
            source: Box::new(ShopError::Store("disk full".into())),
        };
        assert!(err.left_external_side_effect());
        assert_eq!(err.kind(), ErrorKind::StoreFailure);
        assert!(!ShopError::Store("x".into()).left_external_side_effect());
    }
}
