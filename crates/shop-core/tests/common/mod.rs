//! Fakes for driving the saga without any network.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use shop_core::{
    AddItem, CartService, CartStore, CatalogGateway, CheckoutConfig, CheckoutOrchestrator,
    CustomerDirectory, EventPublisher, MemoryStore, PaymentIntent, PaymentSession,
    PaymentStrategy, ProductSnapshot, SessionRequest, SettlementHandler, ShopError, ShopResult,
    UserContext, WebhookEvent, WebhookEventType,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct FakeCatalog {
    products: Mutex<HashMap<String, ProductSnapshot>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeCatalog {
    pub fn put(&self, product_id: &str, stock: u32, price: i64, price_id: Option<&str>) {
        self.products.lock().insert(
            product_id.to_string(),
            ProductSnapshot {
                product_id: product_id.to_string(),
                stock,
                price,
                price_id: price_id.map(String::from),
            },
        );
    }

    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

#[async_trait]
impl CatalogGateway for FakeCatalog {
    async fn snapshot(&self, product_id: &str) -> ShopResult<ProductSnapshot> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.products
            .lock()
            .get(product_id)
            .cloned()
            .ok_or_else(|| ShopError::ProductNotFound {
                product_id: product_id.to_string(),
            })
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    pub unavailable: Mutex<bool>,
}

#[async_trait]
impl CustomerDirectory for FakeDirectory {
    async fn payment_customer_id(&self, user: &UserContext) -> ShopResult<String> {
        if *self.unavailable.lock() {
            return Err(ShopError::upstream("identity", "503 Service Unavailable"));
        }
        Ok(format!("cus_{}", user.user_id))
    }
}

/// Payment provider that records every session request
#[derive(Default)]
pub struct FakePayments {
    pub requests: Mutex<Vec<SessionRequest>>,
    pub reported_total: Mutex<Option<i64>>,
    pub fail: Mutex<bool>,
    /// Added to the cart while the session is being created
    pub add_during_session: Mutex<Option<(Arc<MemoryStore>, AddItem)>>,
}

impl FakePayments {
    pub fn last_request(&self) -> SessionRequest {
        self.requests.lock().last().cloned().expect("no session requested")
    }

    /// Build the success callback the provider would send for the last session
    pub fn success_event(&self, payment_intent: &str) -> WebhookEvent {
        let request = self.last_request();
        WebhookEvent {
            event_id: format!("evt_{payment_intent}"),
            event_type: WebhookEventType::PaymentSucceeded,
            payment_intent: Some(PaymentIntent {
                id: payment_intent.to_string(),
                metadata: request.metadata.to_map().unwrap(),
            }),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl PaymentStrategy for FakePayments {
    async fn create_session(&self, request: &SessionRequest) -> ShopResult<PaymentSession> {
        if *self.fail.lock() {
            return Err(ShopError::Provider {
                provider: "fake".into(),
                message: "card_declined".into(),
            });
        }
        let pending_add = self.add_during_session.lock().take();
        if let Some((store, item)) = pending_add {
            store.add_item(item).await?;
        }
        self.requests.lock().push(request.clone());
        let n = self.requests.lock().len();
        Ok(PaymentSession {
            session_id: format!("cs_test_{n}"),
            checkout_url: format!("https://pay.example.com/cs_test_{n}"),
            reported_total: self.reported_total.lock().unwrap_or(0),
            expires_at: None,
        })
    }

    async fn verify_webhook(&self, _payload: &[u8], _signature: &str) -> ShopResult<WebhookEvent> {
        Err(ShopError::WebhookVerificationFailed("not supported".into()))
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<(String, String, serde_json::Value)>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &serde_json::Value) -> ShopResult<()> {
        self.sent
            .lock()
            .push((topic.to_string(), key.to_string(), payload.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<FakeCatalog>,
    pub directory: Arc<FakeDirectory>,
    pub payments: Arc<FakePayments>,
    pub carts: CartService,
    pub checkout: CheckoutOrchestrator,
    pub settlement: SettlementHandler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(FakeCatalog::default());
        let directory = Arc::new(FakeDirectory::default());
        let payments = Arc::new(FakePayments::default());

        let carts = CartService::new(store.clone(), catalog.clone(), timeout);
        let checkout = CheckoutOrchestrator::new(
            store.clone(),
            store.clone(),
            catalog.clone(),
            directory.clone(),
            payments.clone(),
            CheckoutConfig {
                upstream_timeout: timeout,
                ..CheckoutConfig::default()
            },
        );
        let settlement = SettlementHandler::new(store.clone());

        Self {
            store,
            catalog,
            directory,
            payments,
            carts,
            checkout,
            settlement,
        }
    }

    pub fn user(&self, id: &str) -> UserContext {
        UserContext::new(id)
    }
}
