//! # shop-store
//!
//! PostgreSQL implementation of the `shop_core` store traits.
//!
//! Every trait call runs in its own transaction. Per-user cart writes are
//! serialized with `SELECT ... FOR UPDATE` on the active cart row, and the
//! partial unique index `cart_one_active_per_user` closes the race between
//! two first adds for the same user.
//!
//! ```rust,ignore
//! let store = PgStore::connect(&database_url, 10).await?;
//! store.migrate().await?;
//! ```

mod cart;
mod error;
mod orders;
mod outbox;

pub use error::SqlxErrorExt;

use shop_core::{ShopError, ShopResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Store backed by a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> ShopResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| ShopError::Store(format!("failed to connect to database: {}", e)))?;
        info!(max_connections, "database pool ready");
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> ShopResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ShopError::Store(format!("migration failed: {}", e)))?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
