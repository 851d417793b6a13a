//! # Fulfillment Outbox
//!
//! Fulfillment events are written to the outbox in the same transaction that
//! marks an order paid, then drained by [`OutboxDispatcher`] in the
//! background. Delivery is at-least-once and ordered per order; consumers
//! dedupe on `(order_id, product_id)`.
//!
//! ```text
//!  settlement tx ──► orders.status = paid
//!                └─► outbox rows (pending) ──► dispatcher ──► EventPublisher
//! ```

use crate::error::ShopResult;
use crate::order::FulfillmentEvent;
use crate::store::OutboxStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Topic fulfillment events are published to
pub const FULFILLMENT_TOPIC: &str = "order-service.order-paid";

/// Delivery state of an outbox entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Written, not yet delivered
    Pending,
    /// Delivered to the broker
    Published,
    /// Gave up after the maximum number of attempts
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// A message to be written into the outbox
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub topic: String,
    /// Partition/message key; the order id
    pub key: String,
    pub payload: serde_json::Value,
}

impl OutboxMessage {
    pub fn fulfillment(event: &FulfillmentEvent) -> ShopResult<Self> {
        Ok(Self {
            topic: FULFILLMENT_TOPIC.to_string(),
            key: event.order_id.clone(),
            payload: serde_json::to_value(event)?,
        })
    }
}

/// A stored outbox row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Monotonic sequence; defines publication order
    pub id: i64,
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Downstream messaging backbone
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &serde_json::Value) -> ShopResult<()>;
}

/// Publisher that only logs; used when no broker bridge is configured
#[derive(Debug, Default, Clone)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &serde_json::Value) -> ShopResult<()> {
        info!(topic, key, payload = %payload, "event published (logging publisher)");
        Ok(())
    }
}

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    /// Entries claimed per pass; zero is treated as one
    pub batch_size: usize,
    /// Zero is treated as one
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            max_attempts: 10,
        }
    }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    /// Held back because an earlier entry of the same order failed
    pub skipped: usize,
}

/// Background drainer for the outbox
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: DispatcherConfig,
    wakeup: Arc<Notify>,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        mut config: DispatcherConfig,
    ) -> Self {
        config.batch_size = config.batch_size.max(1);
        config.max_attempts = config.max_attempts.max(1);
        Self {
            store,
            publisher,
            config,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Handle used by settlement to nudge the dispatcher after a commit
    pub fn wakeup_handle(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    /// Publish one batch of pending entries in sequence order
    #[instrument(skip(self))]
    pub async fn drain_once(&self) -> ShopResult<DrainReport> {
        let entries = self.store.claim_pending(self.config.batch_size).await?;
        let mut report = DrainReport {
            claimed: entries.len(),
            ..DrainReport::default()
        };
        let mut blocked: HashSet<String> = HashSet::new();

        for entry in entries {
            if blocked.contains(&entry.key) {
                report.skipped += 1;
                continue;
            }

            match self
                .publisher
                .publish(&entry.topic, &entry.key, &entry.payload)
                .await
            {
                Ok(()) => {
                    self.store.mark_published(entry.id).await?;
                    debug!(entry_id = entry.id, key = %entry.key, "outbox entry published");
                    report.published += 1;
                }
                Err(e) => {
                    warn!(
                        entry_id = entry.id,
                        key = %entry.key,
                        attempt = entry.attempts + 1,
                        "failed to publish outbox entry: {}",
                        e
                    );
                    self.store
                        .mark_failed(entry.id, &e.to_string(), self.config.max_attempts)
                        .await?;
                    blocked.insert(entry.key.clone());
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Drain until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "outbox dispatcher started"
        );

        loop {
            let full_batch = match self.drain_once().await {
                Ok(report) => {
                    report.claimed > 0
                        && report.claimed == self.config.batch_size
                        && report.failed == 0
                }
                Err(e) => {
                    error!("outbox drain failed: {}", e);
                    false
                }
            };
            if *shutdown.borrow() {
                break;
            }
            if full_batch {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("outbox dispatcher stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShopError;
    use crate::memory::MemoryStore;
    use crate::order::Manifest;
    use crate::order::ManifestLine;
    use crate::store::OrderStore;
    use parking_lot::Mutex;

    /// Fails every publish for keys listed in `failing`
    #[derive(Default)]
    struct ScriptedPublisher {
        failing: Mutex<HashSet<String>>,
        sent: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl EventPublisher for ScriptedPublisher {
        async fn publish(&self, _topic: &str, key: &str, payload: &serde_json::Value) -> ShopResult<()> {
            if self.failing.lock().contains(key) {
                return Err(ShopError::upstream("broker", "unavailable"));
            }
            self.sent.lock().push((key.to_string(), payload.clone()));
            Ok(())
        }
    }

    async fn paid_order(store: &MemoryStore, order_id: &str, products: &[&str]) {
        let order = crate::order::NewOrder {
            id: order_id.to_string(),
            user_id: "u1".into(),
            items: products
                .iter()
                .map(|p| crate::order::PricedLine {
                    product_id: p.to_string(),
                    quantity: 1,
                    price_per_unit: 100,
                })
                .collect(),
            total_price: 100 * products.len() as i64,
        };
        store.create_order(&order).await.unwrap();
        let manifest = Manifest(
            products
                .iter()
                .map(|p| ManifestLine {
                    product_id: p.to_string(),
                    quantity: 1,
                })
                .collect(),
        );
        let events = manifest.fulfillment_events(order_id, Utc::now());
        store.settle_order(order_id, "u1", "pi_1", &events).await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_publishes_in_order() {
        let store = Arc::new(MemoryStore::new());
        paid_order(&store, "o1", &["p1", "p2", "p3"]).await;

        let publisher = Arc::new(ScriptedPublisher::default());
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher.clone(), DispatcherConfig::default());

        let report = dispatcher.drain_once().await.unwrap();
        assert_eq!(report.published, 3);

        let sent = publisher.sent.lock();
        let products: Vec<_> = sent
            .iter()
            .map(|(_, p)| p["product_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(products, vec!["p1", "p2", "p3"]);

        drop(sent);
        let again = dispatcher.drain_once().await.unwrap();
        assert_eq!(again.claimed, 0);
    }

    #[tokio::test]
    async fn test_failure_blocks_rest_of_order_only() {
        let store = Arc::new(MemoryStore::new());
        paid_order(&store, "o1", &["p1", "p2"]).await;
        paid_order(&store, "o2", &["p9"]).await;

        let publisher = Arc::new(ScriptedPublisher::default());
        publisher.failing.lock().insert("o1".into());
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher.clone(), DispatcherConfig::default());

        let report = dispatcher.drain_once().await.unwrap();
        assert_eq!(
            report,
            DrainReport {
                claimed: 3,
                published: 1,
                failed: 1,
                skipped: 1
            }
        );

        publisher.failing.lock().clear();
        let retry = dispatcher.drain_once().await.unwrap();
        assert_eq!(retry.published, 2);
        assert_eq!(publisher.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_entry_parked_after_max_attempts() {
        let store = Arc::new(MemoryStore::new());
        paid_order(&store, "o1", &["p1"]).await;

        let publisher = Arc::new(ScriptedPublisher::default());
        publisher.failing.lock().insert("o1".into());
        let config = DispatcherConfig {
            max_attempts: 2,
            ..DispatcherConfig::default()
        };
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher, config);

        assert_eq!(dispatcher.drain_once().await.unwrap().failed, 1);
        assert_eq!(dispatcher.drain_once().await.unwrap().failed, 1);
        assert_eq!(dispatcher.drain_once().await.unwrap().claimed, 0);

        let parked = store.outbox_entries();
        assert_eq!(parked[0].status, OutboxStatus::Failed);
        assert_eq!(parked[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        paid_order(&store, "o1", &["p1"]).await;
        let publisher = Arc::new(ScriptedPublisher::default());
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher.clone(), DispatcherConfig::default());

        let (tx, rx) = watch::channel(false);
        let handle = dispatcher.spawn(rx);

        for _ in 0..50 {
            if !publisher.sent.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(publisher.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_batch_size_still_drains_and_stops() {
        let store = Arc::new(MemoryStore::new());
        paid_order(&store, "o1", &["p1", "p2"]).await;
        let publisher = Arc::new(ScriptedPublisher::default());
        let config = DispatcherConfig {
            batch_size: 0,
            max_attempts: 0,
            ..DispatcherConfig::default()
        };
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher.clone(), config);

        let (tx, rx) = watch::channel(false);
        let handle = dispatcher.spawn(rx);

        for _ in 0..50 {
            if publisher.sent.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("dispatcher did not stop after shutdown")
            .unwrap();

        assert_eq!(publisher.sent.lock().len(), 2);
        assert!(store
            .outbox_entries()
            .iter()
            .all(|e| e.status == OutboxStatus::Published));
    }
}
