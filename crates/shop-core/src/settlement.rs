//! # Settlement
//!
//! Consumes the provider's asynchronous payment confirmation. Only the
//! payment-succeeded event is acted on; every other type is acknowledged
//! and ignored.
//!
//! Providers redeliver callbacks, so the status check and the transition
//! happen in one store transaction together with the outbox writes. A second
//! delivery for a paid order is a no-op that still acknowledges success. The
//! `user_id` carried in the metadata must own the order.

use crate::error::{ShopError, ShopResult};
use crate::order::SettleOutcome;
use crate::store::OrderStore;
use crate::strategy::{SessionMetadata, WebhookEvent, WebhookEventType};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, instrument};

/// How a callback was acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementAck {
    /// Order moved to paid; `events` fulfillment events queued
    Settled { order_id: String, events: usize },
    /// Order was already paid by an earlier delivery
    Duplicate { order_id: String },
    /// Event type is not acted upon
    Ignored { event_type: String },
}

/// Applies payment confirmations to orders
pub struct SettlementHandler {
    orders: Arc<dyn OrderStore>,
    dispatcher: Option<Arc<Notify>>,
}

impl SettlementHandler {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self {
            orders,
            dispatcher: None,
        }
    }

    /// Nudge this dispatcher after each committed settlement
    pub fn with_dispatcher(mut self, wakeup: Arc<Notify>) -> Self {
        self.dispatcher = Some(wakeup);
        self
    }

    /// Apply a verified webhook event.
    ///
    /// Returns once the status transition has committed; publication of the
    /// fulfillment events happens later from the outbox.
    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn handle(&self, event: &WebhookEvent) -> ShopResult<SettlementAck> {
        match &event.event_type {
            WebhookEventType::PaymentSucceeded => self.settle(event).await,
            WebhookEventType::Other(event_type) => {
                info!(event_type = %event_type, "Unhandled event type");
                Ok(SettlementAck::Ignored {
                    event_type: event_type.clone(),
                })
            }
        }
    }

    async fn settle(&self, event: &WebhookEvent) -> ShopResult<SettlementAck> {
        let intent = event
            .payment_intent
            .as_ref()
            .ok_or_else(|| ShopError::WebhookParse("missing payment intent object".to_string()))?;

        let metadata = SessionMetadata::from_map(&intent.metadata)?;
        if metadata.manifest.is_empty() {
            return Err(ShopError::WebhookParse(format!(
                "empty products manifest for order {}",
                metadata.order_id
            )));
        }

        info!(
            order_id = %metadata.order_id,
            user_id = %metadata.user_id,
            payment_intent = %intent.id,
            "payment succeeded"
        );

        let events = metadata
            .manifest
            .fulfillment_events(&metadata.order_id, Utc::now());

        match self
            .orders
            .settle_order(&metadata.order_id, &metadata.user_id, &intent.id, &events)
            .await?
        {
            SettleOutcome::Transitioned => {
                if let Some(wakeup) = &self.dispatcher {
                    wakeup.notify_one();
                }
                info!(
                    order_id = %metadata.order_id,
                    events = events.len(),
                    "order paid, fulfillment events queued"
                );
                Ok(SettlementAck::Settled {
                    order_id: metadata.order_id,
                    events: events.len(),
                })
            }
            SettleOutcome::AlreadyPaid => {
                info!(order_id = %metadata.order_id, "duplicate settlement ignored");
                Ok(SettlementAck::Duplicate {
                    order_id: metadata.order_id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::order::{NewOrder, OrderStatus, PricedLine};
    use crate::strategy::PaymentIntent;
    use std::collections::HashMap;

    fn success_event(metadata: HashMap<String, String>) -> WebhookEvent {
        WebhookEvent {
            event_id: "evt_1".into(),
            event_type: WebhookEventType::PaymentSucceeded,
            payment_intent: Some(PaymentIntent {
                id: "pi_1".into(),
                metadata,
            }),
            timestamp: Utc::now(),
        }
    }

    fn metadata(order_id: &str) -> HashMap<String, String> {
        HashMap::from([
            ("order_id".to_string(), order_id.to_string()),
            ("user_id".to_string(), "u1".to_string()),
            (
                "products".to_string(),
                r#"[{"product_id":"p1","quantity":2}]"#.to_string(),
            ),
        ])
    }

    async fn store_with_order() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .create_order(&NewOrder {
                id: "o1".into(),
                user_id: "u1".into(),
                items: vec![PricedLine {
                    product_id: "p1".into(),
                    quantity: 2,
                    price_per_unit: 500,
                }],
                total_price: 1000,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_unhandled_event_is_acknowledged() {
        let handler = SettlementHandler::new(Arc::new(MemoryStore::new()));
        let event = WebhookEvent {
            event_id: "evt_2".into(),
            event_type: WebhookEventType::Other("charge.refunded".into()),
            payment_intent: None,
            timestamp: Utc::now(),
        };
        assert_eq!(
            handler.handle(&event).await.unwrap(),
            SettlementAck::Ignored {
                event_type: "charge.refunded".into()
            }
        );
    }

    #[tokio::test]
    async fn test_settle_marks_paid_and_queues_events() {
        let store = store_with_order().await;
        let wakeup = Arc::new(Notify::new());
        let handler = SettlementHandler::new(store.clone()).with_dispatcher(wakeup.clone());

        let ack = handler.handle(&success_event(metadata("o1"))).await.unwrap();
        assert_eq!(
            ack,
            SettlementAck::Settled {
                order_id: "o1".into(),
                events: 1
            }
        );

        let order = store.get_order("o1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.stripe_transaction_id.as_deref(), Some("pi_1"));
        assert_eq!(store.outbox_entries().len(), 1);

        // notify_one stored a permit for the dispatcher
        tokio::time::timeout(std::time::Duration::from_millis(50), wakeup.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let handler = SettlementHandler::new(Arc::new(MemoryStore::new()));
        let err = handler
            .handle(&success_event(metadata("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::OrderNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_metadata_is_parse_error() {
        let store = store_with_order().await;
        let handler = SettlementHandler::new(store.clone());
        let mut meta = metadata("o1");
        meta.remove("products");

        let err = handler.handle(&success_event(meta)).await.unwrap_err();
        assert!(matches!(err, ShopError::WebhookParse(_)));
        assert_eq!(store.get_order("o1").await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_foreign_user_cannot_settle() {
        let store = store_with_order().await;
        let handler = SettlementHandler::new(store.clone());
        let mut meta = metadata("o1");
        meta.insert("user_id".into(), "u2".into());

        let err = handler.handle(&success_event(meta)).await.unwrap_err();
        assert!(matches!(err, ShopError::WebhookParse(_)));
        assert_eq!(store.get_order("o1").await.unwrap().status, OrderStatus::Pending);
        assert!(store.outbox_entries().is_empty());
    }
}
