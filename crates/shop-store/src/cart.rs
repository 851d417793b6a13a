use crate::error::{db_quantity, quantity, SqlxErrorExt};
use crate::PgStore;
use async_trait::async_trait;
use shop_core::{
    AddItem, CartConversion, CartLine, CartSnapshot, CartStore, ShopError, ShopResult,
};
use sqlx::{Postgres, Transaction};
use tracing::debug;

/// Lock the user's active cart row, if any
async fn lock_active_cart(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
) -> ShopResult<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM cart WHERE user_id = $1 AND status = 'active' FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(SqlxErrorExt::into_shop_error)?;
    Ok(row.map(|(id,)| id))
}

/// Lock the user's active cart, creating it first when absent.
///
/// Concurrent first adds meet on the partial unique index; the loser waits
/// for the winner's commit and then locks the same row. A conversion that
/// commits while we wait on the lock makes the locked row drop out of the
/// `status = 'active'` filter, so the lookup is retried against the cart
/// that replaced it.
async fn ensure_active_cart(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
) -> ShopResult<i64> {
    for _ in 0..3 {
        sqlx::query(
            "INSERT INTO cart (user_id) VALUES ($1) \
             ON CONFLICT (user_id) WHERE status = 'active' DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?;

        if let Some(id) = lock_active_cart(tx, user_id).await? {
            return Ok(id);
        }
    }
    Err(ShopError::Internal(
        "active cart kept changing under the lock".into(),
    ))
}

async fn cart_lines(
    tx: &mut Transaction<'_, Postgres>,
    cart_id: i64,
) -> ShopResult<Vec<CartLine>> {
    let rows: Vec<(String, i32)> = sqlx::query_as(
        "SELECT product_id, quantity FROM cart_items WHERE cart_id = $1 ORDER BY id",
    )
    .bind(cart_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(SqlxErrorExt::into_shop_error)?;

    rows.into_iter()
        .map(|(product_id, q)| Ok(CartLine::new(product_id, quantity(q)?)))
        .collect()
}

#[async_trait]
impl CartStore for PgStore {
    async fn add_item(&self, item: AddItem) -> ShopResult<()> {
        let mut tx = self.pool.begin().await.map_err(SqlxErrorExt::into_shop_error)?;

        let cart_id = ensure_active_cart(&mut tx, &item.user_id).await?;

        let existing: Option<(i32,)> = sqlx::query_as(
            "SELECT quantity FROM cart_items WHERE cart_id = $1 AND product_id = $2",
        )
        .bind(cart_id)
        .bind(&item.product_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?;

        let merged = match existing {
            Some((current,)) => quantity(current)?
                .checked_add(item.quantity)
                .ok_or_else(|| ShopError::Validation("quantity overflow".to_string()))?,
            None => item.quantity,
        };
        // Dropping `tx` on error rolls back the lazily created cart too.
        item.check_stock(merged)?;

        sqlx::query(
            "INSERT INTO cart_items (cart_id, product_id, quantity) VALUES ($1, $2, $3) \
             ON CONFLICT (cart_id, product_id) \
             DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = NOW()",
        )
        .bind(cart_id)
        .bind(&item.product_id)
        .bind(db_quantity(merged)?)
        .execute(&mut *tx)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?;

        sqlx::query("UPDATE cart SET updated_at = NOW() WHERE id = $1")
            .bind(cart_id)
            .execute(&mut *tx)
            .await
            .map_err(SqlxErrorExt::into_shop_error)?;

        tx.commit().await.map_err(SqlxErrorExt::into_shop_error)?;
        debug!(cart_id, product_id = %item.product_id, quantity = merged, "cart line stored");
        Ok(())
    }

    async fn snapshot_active(&self, user_id: &str) -> ShopResult<CartSnapshot> {
        let mut tx = self.pool.begin().await.map_err(SqlxErrorExt::into_shop_error)?;

        let cart_id = lock_active_cart(&mut tx, user_id)
            .await?
            .ok_or_else(|| ShopError::CartNotFound {
                user_id: user_id.to_string(),
            })?;
        let lines = cart_lines(&mut tx, cart_id).await?;

        tx.commit().await.map_err(SqlxErrorExt::into_shop_error)?;
        Ok(CartSnapshot { cart_id, lines })
    }

    async fn convert_cart(&self, snapshot: &CartSnapshot) -> ShopResult<CartConversion> {
        let mut tx = self.pool.begin().await.map_err(SqlxErrorExt::into_shop_error)?;

        let locked: Option<(String,)> = sqlx::query_as(
            "SELECT user_id FROM cart WHERE id = $1 AND status = 'active' FOR UPDATE",
        )
        .bind(snapshot.cart_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?;
        let Some((user_id,)) = locked else {
            return Ok(CartConversion::NotActive);
        };

        let added = snapshot.added_since(&cart_lines(&mut tx, snapshot.cart_id).await?);

        sqlx::query("UPDATE cart SET status = 'converted', updated_at = NOW() WHERE id = $1")
            .bind(snapshot.cart_id)
            .execute(&mut *tx)
            .await
            .map_err(SqlxErrorExt::into_shop_error)?;

        if added.is_empty() {
            tx.commit().await.map_err(SqlxErrorExt::into_shop_error)?;
            return Ok(CartConversion::Converted);
        }

        let (fresh_id,): (i64,) =
            sqlx::query_as("INSERT INTO cart (user_id) VALUES ($1) RETURNING id")
                .bind(&user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(SqlxErrorExt::into_shop_error)?;
        for line in &added {
            sqlx::query("INSERT INTO cart_items (cart_id, product_id, quantity) VALUES ($1, $2, $3)")
                .bind(fresh_id)
                .bind(&line.product_id)
                .bind(db_quantity(line.quantity)?)
                .execute(&mut *tx)
                .await
                .map_err(SqlxErrorExt::into_shop_error)?;
        }

        tx.commit().await.map_err(SqlxErrorExt::into_shop_error)?;
        debug!(
            cart_id = snapshot.cart_id,
            fresh_cart_id = fresh_id,
            lines = added.len(),
            "lines added during checkout moved to a fresh cart"
        );
        Ok(CartConversion::CarriedOver(added))
    }
}
