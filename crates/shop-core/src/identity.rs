//! # Identity Collaborator
//!
//! Resolves the payment-provider customer behind an authenticated user.

use crate::error::ShopResult;
use async_trait::async_trait;

/// The authenticated caller, as established by the transport layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
    /// Raw `Authorization` header, forwarded to the identity service
    pub authorization: Option<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            authorization: None,
        }
    }

    pub fn with_authorization(mut self, header: impl Into<String>) -> Self {
        self.authorization = Some(header.into());
        self
    }
}

/// User/payment-profile collaborator
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Payment-provider customer id (`cus_...`) for the caller
    async fn payment_customer_id(&self, user: &UserContext) -> ShopResult<String>;
}
