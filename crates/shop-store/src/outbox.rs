use crate::error::SqlxErrorExt;
use crate::PgStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shop_core::{OutboxEntry, OutboxStatus, OutboxStore, ShopError, ShopResult};

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    topic: String,
    message_key: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

fn parse_status(raw: &str) -> ShopResult<OutboxStatus> {
    match raw {
        "pending" => Ok(OutboxStatus::Pending),
        "published" => Ok(OutboxStatus::Published),
        "failed" => Ok(OutboxStatus::Failed),
        other => Err(ShopError::Store(format!("unknown outbox status {other}"))),
    }
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = ShopError;

    fn try_from(row: OutboxRow) -> ShopResult<Self> {
        Ok(OutboxEntry {
            id: row.id,
            topic: row.topic,
            key: row.message_key,
            payload: row.payload,
            status: parse_status(&row.status)?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            last_error: row.last_error,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn claim_pending(&self, limit: usize) -> ShopResult<Vec<OutboxEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        sqlx::query_as::<_, OutboxRow>(
            "SELECT id, topic, message_key, payload, status, attempts, last_error, created_at \
             FROM outbox WHERE status = 'pending' ORDER BY id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?
        .into_iter()
        .map(OutboxEntry::try_from)
        .collect()
    }

    async fn mark_published(&self, id: i64) -> ShopResult<()> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'published', attempts = attempts + 1, \
             published_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?;

        if result.rows_affected() == 0 {
            return Err(ShopError::Store(format!("outbox entry {id} not found")));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str, max_attempts: u32) -> ShopResult<()> {
        let max_attempts = i32::try_from(max_attempts).unwrap_or(i32::MAX);
        let result = sqlx::query(
            "UPDATE outbox SET attempts = attempts + 1, last_error = $2, \
             status = CASE WHEN attempts + 1 >= $3 THEN 'failed' ELSE 'pending' END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(max_attempts)
        .execute(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_shop_error)?;

        if result.rows_affected() == 0 {
            return Err(ShopError::Store(format!("outbox entry {id} not found")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("pending").unwrap(), OutboxStatus::Pending);
        assert_eq!(parse_status("failed").unwrap(), OutboxStatus::Failed);
        assert!(parse_status("lost").is_err());
    }

    #[test]
    fn test_row_conversion() {
        let entry = OutboxEntry::try_from(OutboxRow {
            id: 7,
            topic: "order-service.order-paid".into(),
            message_key: "o1".into(),
            payload: serde_json::json!({"order_id": "o1"}),
            status: "pending".into(),
            attempts: 2,
            last_error: Some("broker down".into()),
            created_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(entry.key, "o1");
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.status, OutboxStatus::Pending);
    }
}
