//! # Collaborator Clients
//!
//! HTTP implementations of the catalog, identity and event-publishing
//! collaborators. All of them share one `reqwest::Client` built with the
//! configured timeout.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use shop_core::{
    CatalogGateway, CustomerDirectory, EventPublisher, ProductSnapshot, ShopError, ShopResult,
    UserContext,
};
use std::time::Duration;
use tracing::{debug, instrument};

/// Build the shared HTTP client
pub fn http_client(timeout: Duration) -> ShopResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ShopError::Configuration(format!("HTTP client: {}", e)))
}

fn base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Product service client
#[derive(Clone)]
pub struct HttpCatalogGateway {
    client: Client,
    base_url: String,
}

impl HttpCatalogGateway {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base(base_url),
        }
    }

    /// `{base}/products/stock/{product_id}` with the id percent-encoded as a
    /// single segment
    fn stock_url(&self, product_id: &str) -> ShopResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ShopError::Configuration(format!("catalog url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                ShopError::Configuration(format!("catalog url {} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .extend(["products", "stock", product_id]);
        Ok(url)
    }
}

#[async_trait]
impl CatalogGateway for HttpCatalogGateway {
    #[instrument(skip(self))]
    async fn snapshot(&self, product_id: &str) -> ShopResult<ProductSnapshot> {
        let url = self.stock_url(product_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ShopError::upstream("catalog", e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ShopError::ProductNotFound {
                product_id: product_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ShopError::upstream("catalog", format!("HTTP {}", status)));
        }

        let snapshot: ProductSnapshot = response
            .json()
            .await
            .map_err(|e| ShopError::upstream("catalog", format!("bad product body: {}", e)))?;
        debug!(stock = snapshot.stock, price = snapshot.price, "product snapshot");
        Ok(snapshot)
    }
}

#[derive(Debug, Deserialize)]
struct StripeCustomerBody {
    #[serde(default)]
    stripe_customer_id: String,
}

/// User service client
#[derive(Clone)]
pub struct HttpCustomerDirectory {
    client: Client,
    base_url: String,
}

impl HttpCustomerDirectory {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base(base_url),
        }
    }
}

#[async_trait]
impl CustomerDirectory for HttpCustomerDirectory {
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    async fn payment_customer_id(&self, user: &UserContext) -> ShopResult<String> {
        let mut request = self.client.get(format!("{}/users/stripe", self.base_url));
        if let Some(auth) = &user.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ShopError::upstream("identity", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ShopError::upstream(
                "identity",
                format!("HTTP {}", response.status()),
            ));
        }

        let body: StripeCustomerBody = response
            .json()
            .await
            .map_err(|e| ShopError::upstream("identity", format!("bad customer body: {}", e)))?;
        if body.stripe_customer_id.is_empty() {
            return Err(ShopError::upstream("identity", "empty stripe_customer_id"));
        }
        Ok(body.stripe_customer_id)
    }
}

/// Publishes to the broker through its HTTP bridge
#[derive(Clone)]
pub struct HttpEventPublisher {
    client: Client,
    base_url: String,
}

impl HttpEventPublisher {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base(base_url),
        }
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    #[instrument(skip(self, payload))]
    async fn publish(&self, topic: &str, key: &str, payload: &serde_json::Value) -> ShopResult<()> {
        let response = self
            .client
            .post(format!("{}/topics/{}", self.base_url, topic))
            .header("X-Message-Key", key)
            .json(payload)
            .send()
            .await
            .map_err(|e| ShopError::upstream("event-bridge", e.to_string()))?;

        if !response.status().is_success() {
            return Err(ShopError::upstream(
                "event-bridge",
                format!("HTTP {}", response.status()),
            ));
        }
        Ok(())
    }
}
