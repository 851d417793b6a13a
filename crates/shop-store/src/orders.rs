use crate::error::{db_quantity, quantity, SqlxErrorExt};
use crate::PgStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shop_core::{
    check_owner, FulfillmentEvent, NewOrder, Order, OrderItem, OrderStatus, OrderStore,
    OutboxMessage, SettleOutcome, ShopError, ShopResult,
};
use sqlx::{Postgres, Transaction};
use tracing::debug;

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    user_id: String,
    status: String,
    stripe_transaction_id: Option<String>,
    total_price: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: String,
    order_id: String,
    product_id: String,
    quantity: i32,
    price_per_unit: i64,
    total_price: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = ShopError;

    fn try_from(row: OrderItemRow) -> ShopResult<Self> {
        Ok(OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: quantity(row.quantity)?,
            price_per_unit: row.price_per_unit,
            total_price: row.total_price,
            created_at: row.created_at,
        })
    }
}

/// Current status of an order, row-locked for the rest of the transaction
/// Lock the order row; returns its status and owner
async fn lock_order(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &str,
) -> ShopResult<(OrderStatus, String)> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT status, user_id FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(SqlxErrorExt::into_shop_error)?;

    match row {
        Some((status, user_id)) => Ok((OrderStatus::parse(&status)?, user_id)),
        None => Err(ShopError::OrderNotFound {
            order_id: order_id.to_string(),
        }),
    }
}

async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &str,
    status: OrderStatus,
    provider_transaction_id: &str,
) -> ShopResult<()> {
    let result = sqlx::query(
        "UPDATE orders SET status = $1, stripe_transaction_id = $2, updated_at = NOW() \
         WHERE id = $3",
    )
    .bind(status.as_str())
    .bind(provider_transaction_id)
    .bind(order_id)
    .execute(&mut **tx)
    .await
    .map_err(SqlxErrorExt::into_shop_error)?;

    if result.rows_affected() == 0 {
        return Err(ShopError::OrderNotFound {
            order_id: order_id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl OrderStore for PgStore {
    async fn create_order(&self, order: &NewOrder) -> ShopResult<()> {
        order.validate()?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(SqlxErrorExt::into_shop_error)?;

        sqlx::query(
            "INSERT INTO orders (id, user_id, status, total_price, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(OrderStatus::Pending.as_str())
        .bind(order.total_price)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?;

        for item in order.order_items(now)? {
            sqlx::query(
                "INSERT INTO order_items \
                 (id, order_id, product_id, quantity, price_per_unit, total_price, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(db_quantity(item.quantity)?)
            .bind(item.price_per_unit)
            .bind(item.total_price)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await
            .map_err(SqlxErrorExt::into_shop_error)?;
        }

        tx.commit().await.map_err(SqlxErrorExt::into_shop_error)?;
        debug!(order_id = %order.id, items = order.items.len(), "order stored");
        Ok(())
    }

    async fn update_order(
        &self,
        order_id: &str,
        status: OrderStatus,
        provider_transaction_id: &str,
    ) -> ShopResult<()> {
        let mut tx = self.pool.begin().await.map_err(SqlxErrorExt::into_shop_error)?;

        let (current, _) = lock_order(&mut tx, order_id).await?;
        if !current.can_transition_to(status) {
            return Err(current.transition_error(order_id, status));
        }
        set_status(&mut tx, order_id, status, provider_transaction_id).await?;

        tx.commit().await.map_err(SqlxErrorExt::into_shop_error)?;
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> ShopResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT id, user_id, status, stripe_transaction_id, total_price, created_at, updated_at \
             FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?
        .ok_or_else(|| ShopError::OrderNotFound {
            order_id: order_id.to_string(),
        })?;

        let items = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, order_id, product_id, quantity, price_per_unit, total_price, created_at \
             FROM order_items WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?
        .into_iter()
        .map(OrderItem::try_from)
        .collect::<ShopResult<Vec<_>>>()?;

        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            status: OrderStatus::parse(&row.status)?,
            stripe_transaction_id: row.stripe_transaction_id,
            total_price: row.total_price,
            created_at: row.created_at,
            updated_at: row.updated_at,
            items,
        })
    }

    async fn settle_order(
        &self,
        order_id: &str,
        user_id: &str,
        provider_transaction_id: &str,
        events: &[FulfillmentEvent],
    ) -> ShopResult<SettleOutcome> {
        let messages = events
            .iter()
            .map(OutboxMessage::fulfillment)
            .collect::<ShopResult<Vec<_>>>()?;

        let mut tx = self.pool.begin().await.map_err(SqlxErrorExt::into_shop_error)?;

        // The row lock makes a concurrent duplicate delivery wait here and
        // then observe `paid`.
        let (current, owner) = lock_order(&mut tx, order_id).await?;
        check_owner(order_id, &owner, user_id)?;
        match current {
            OrderStatus::Paid => return Ok(SettleOutcome::AlreadyPaid),
            OrderStatus::Canceled => {
                return Err(OrderStatus::Canceled.transition_error(order_id, OrderStatus::Paid))
            }
            OrderStatus::Pending => {}
        }

        for message in &messages {
            sqlx::query("INSERT INTO outbox (topic, message_key, payload) VALUES ($1, $2, $3)")
                .bind(&message.topic)
                .bind(&message.key)
                .bind(&message.payload)
                .execute(&mut *tx)
                .await
                .map_err(SqlxErrorExt::into_shop_error)?;
        }

        set_status(&mut tx, order_id, OrderStatus::Paid, provider_transaction_id).await?;

        tx.commit().await.map_err(SqlxErrorExt::into_shop_error)?;
        debug!(order_id, outbox_rows = messages.len(), "order settled");
        Ok(SettleOutcome::Transitioned)
    }
}
