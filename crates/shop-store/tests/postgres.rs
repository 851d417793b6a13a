//! Store behavior against a live Postgres.
//!
//! Runs only when `DATABASE_URL` is set; otherwise each test returns early.
//! Every test works on fresh user and order ids, so a shared database is fine.

use chrono::Utc;
use shop_core::{
    AddItem, CartConversion, CartLine, CartStore, Manifest, ManifestLine, NewOrder, OrderStatus,
    OrderStore, PricedLine, SettleOutcome, ShopError,
};
use shop_store::PgStore;
use std::sync::Arc;
use uuid::Uuid;

async fn store() -> Option<PgStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 20).await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

fn fresh(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

fn add(user: &str, product: &str, quantity: u32, stock: u32) -> AddItem {
    AddItem {
        user_id: user.to_string(),
        product_id: product.to_string(),
        quantity,
        known_stock: stock,
        price_ref: Some("price_abc".into()),
    }
}

fn order(id: &str, user: &str) -> NewOrder {
    NewOrder {
        id: id.to_string(),
        user_id: user.to_string(),
        items: vec![
            PricedLine {
                product_id: "p1".into(),
                quantity: 2,
                price_per_unit: 500,
            },
            PricedLine {
                product_id: "p2".into(),
                quantity: 1,
                price_per_unit: 250,
            },
        ],
        total_price: 1250,
    }
}

fn manifest(lines: &[(&str, u32)]) -> Manifest {
    Manifest(
        lines
            .iter()
            .map(|(p, q)| ManifestLine {
                product_id: p.to_string(),
                quantity: *q,
            })
            .collect(),
    )
}

async fn outbox_rows(store: &PgStore, order_id: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox WHERE message_key = $1")
        .bind(order_id)
        .fetch_one(store.pool())
        .await
        .unwrap();
    n
}

async fn cart_count(store: &PgStore, user: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cart WHERE user_id = $1")
        .bind(user)
        .fetch_one(store.pool())
        .await
        .unwrap();
    n
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_adds_share_one_cart() {
    let Some(store) = store().await else { return };
    let store = Arc::new(store);
    let user = fresh("u");

    let mut tasks = Vec::new();
    for i in 0..24u32 {
        let store = store.clone();
        let user = user.clone();
        tasks.push(tokio::spawn(async move {
            store.add_item(add(&user, "p1", 1 + i % 3, 1000)).await
        }));
    }
    let mut expected = 0;
    for (i, task) in tasks.into_iter().enumerate() {
        task.await.unwrap().unwrap();
        expected += 1 + (i as u32 % 3);
    }

    assert_eq!(cart_count(&store, &user).await, 1);
    assert_eq!(
        store.get_active_items(&user).await.unwrap(),
        vec![CartLine::new("p1", expected)]
    );
}

#[tokio::test]
async fn test_rejected_add_leaves_rows_unchanged() {
    let Some(store) = store().await else { return };
    let user = fresh("u");

    let err = store.add_item(add(&user, "p1", 6, 5)).await.unwrap_err();
    assert!(matches!(err, ShopError::InsufficientStock { .. }));
    assert_eq!(cart_count(&store, &user).await, 0);

    store.add_item(add(&user, "p1", 3, 5)).await.unwrap();
    let err = store.add_item(add(&user, "p1", 4, 5)).await.unwrap_err();
    assert!(matches!(err, ShopError::InsufficientStock { requested: 7, .. }));
    assert_eq!(
        store.get_active_items(&user).await.unwrap(),
        vec![CartLine::new("p1", 3)]
    );
}

#[tokio::test]
async fn test_convert_carries_over_later_adds() {
    let Some(store) = store().await else { return };
    let user = fresh("u");

    store.add_item(add(&user, "p1", 2, 10)).await.unwrap();
    let snapshot = store.snapshot_active(&user).await.unwrap();
    store.add_item(add(&user, "p9", 3, 10)).await.unwrap();

    assert_eq!(
        store.convert_cart(&snapshot).await.unwrap(),
        CartConversion::CarriedOver(vec![CartLine::new("p9", 3)])
    );
    assert_eq!(
        store.convert_cart(&snapshot).await.unwrap(),
        CartConversion::NotActive
    );
    assert_eq!(
        store.get_active_items(&user).await.unwrap(),
        vec![CartLine::new("p9", 3)]
    );

    // adds keep landing in the replacement cart
    store.add_item(add(&user, "p9", 1, 10)).await.unwrap();
    assert_eq!(
        store.get_active_items(&user).await.unwrap(),
        vec![CartLine::new("p9", 4)]
    );
    assert_eq!(cart_count(&store, &user).await, 2);
}

#[tokio::test]
async fn test_order_round_trip_and_guarded_update() {
    let Some(store) = store().await else { return };
    let user = fresh("u");
    let id = fresh("o");

    store.create_order(&order(&id, &user)).await.unwrap();
    let read = store.get_order(&id).await.unwrap();
    assert_eq!(read.status, OrderStatus::Pending);
    assert_eq!(read.items.len(), 2);
    assert_eq!(read.items_total(), 1250);

    assert!(matches!(
        store
            .update_order(&fresh("missing"), OrderStatus::Paid, "pi_1")
            .await,
        Err(ShopError::OrderNotFound { .. })
    ));

    store.update_order(&id, OrderStatus::Canceled, "").await.unwrap();
    assert!(matches!(
        store.update_order(&id, OrderStatus::Paid, "pi_1").await,
        Err(ShopError::InvalidTransition { .. })
    ));
    assert_eq!(
        store.get_order(&id).await.unwrap().status,
        OrderStatus::Canceled
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_settlement_writes_one_outbox_set() {
    let Some(store) = store().await else { return };
    let store = Arc::new(store);
    let user = fresh("u");
    let id = fresh("o");
    store.create_order(&order(&id, &user)).await.unwrap();

    let events = manifest(&[("p1", 2), ("p2", 1)]).fulfillment_events(&id, Utc::now());

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let (id, user, events) = (id.clone(), user.clone(), events.clone());
        tasks.push(tokio::spawn(async move {
            store.settle_order(&id, &user, "pi_1", &events).await
        }));
    }
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }

    let transitioned = outcomes
        .iter()
        .filter(|o| **o == SettleOutcome::Transitioned)
        .count();
    assert_eq!(transitioned, 1);
    assert_eq!(outbox_rows(&store, &id).await, 2);

    let paid = store.get_order(&id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.stripe_transaction_id.as_deref(), Some("pi_1"));
}

#[tokio::test]
async fn test_settlement_by_foreign_user_is_rejected() {
    let Some(store) = store().await else { return };
    let id = fresh("o");
    store.create_order(&order(&id, "owner")).await.unwrap();

    let events = manifest(&[("p1", 2)]).fulfillment_events(&id, Utc::now());
    assert!(store
        .settle_order(&id, "intruder", "pi_1", &events)
        .await
        .is_err());

    assert_eq!(
        store.get_order(&id).await.unwrap().status,
        OrderStatus::Pending
    );
    assert_eq!(outbox_rows(&store, &id).await, 0);
}
