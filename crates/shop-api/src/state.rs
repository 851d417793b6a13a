//! # Application State
//!
//! Configuration and shared state for the Axum application. Every component
//! is handed its collaborators here; nothing is read from globals later.

use serde::Deserialize;
use shop_core::{
    BoxedPaymentStrategy, CartService, CartStore, CatalogGateway, CheckoutConfig,
    CheckoutOrchestrator, CheckoutUrls, CustomerDirectory, DispatcherConfig, OrderStore,
    OutboxStore, SettlementHandler,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Collaborator endpoints as they may appear in `config/services.toml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesFile {
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default)]
    pub identity_url: Option<String>,
    #[serde(default)]
    pub event_bridge_url: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Postgres URL; the in-memory store is used without one
    pub database_url: Option<String>,
    pub catalog_service_url: String,
    pub identity_service_url: String,
    /// Broker bridge; fulfillment events are only logged without one
    pub event_bridge_url: Option<String>,
    /// Bound on every collaborator call
    pub upstream_timeout: Duration,
    pub urls: CheckoutUrls,
    pub currency: String,
    pub outbox: DispatcherConfig,
}

fn parsed<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl AppConfig {
    /// Load from environment variables, falling back to `config/services.toml`
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let services = load_services_file()?;
        Ok(Self::from_lookup(services, |key| std::env::var(key).ok()))
    }

    /// Build from an arbitrary variable source; variables win over the file
    pub fn from_lookup(services: ServicesFile, var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = DispatcherConfig::default();
        let base = CheckoutUrls::default();

        Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parsed(var("PORT"), 8080),
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            database_url: var("DATABASE_URL").filter(|v| !v.is_empty()),
            catalog_service_url: var("CATALOG_SERVICE_URL")
                .or(services.catalog_url)
                .unwrap_or_else(|| "http://localhost:8081".to_string()),
            identity_service_url: var("IDENTITY_SERVICE_URL")
                .or(services.identity_url)
                .unwrap_or_else(|| "http://localhost:8082".to_string()),
            event_bridge_url: var("EVENT_BRIDGE_URL")
                .or(services.event_bridge_url)
                .filter(|v| !v.is_empty()),
            upstream_timeout: Duration::from_millis(parsed(var("UPSTREAM_TIMEOUT_MS"), 5000)),
            urls: CheckoutUrls::new(
                var("CHECKOUT_SUCCESS_URL").unwrap_or(base.success_url),
                var("CHECKOUT_CANCEL_URL").unwrap_or(base.cancel_url),
            ),
            currency: var("CHECKOUT_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|| "inr".to_string()),
            outbox: DispatcherConfig {
                poll_interval: Duration::from_millis(parsed(
                    var("OUTBOX_POLL_INTERVAL_MS"),
                    defaults.poll_interval.as_millis() as u64,
                )),
                batch_size: parsed(var("OUTBOX_BATCH_SIZE"), defaults.batch_size).max(1),
                max_attempts: parsed(var("OUTBOX_MAX_ATTEMPTS"), defaults.max_attempts).max(1),
            },
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {}:{}: {}", self.host, self.port, e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn checkout(&self) -> CheckoutConfig {
        CheckoutConfig {
            urls: self.urls.clone(),
            currency: self.currency.clone(),
            upstream_timeout: self.upstream_timeout,
        }
    }
}

/// Load collaborator URLs from the first services file found
fn load_services_file() -> anyhow::Result<ServicesFile> {
    let config_paths = [
        "config/services.toml",
        "../config/services.toml",
        "crates/shop-api/config/services.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let services: ServicesFile = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
            tracing::info!("Loaded service endpoints from {}", path);
            return Ok(services);
        }
    }

    Ok(ServicesFile::default())
}

/// The three store roles, usually backed by one implementation
#[derive(Clone)]
pub struct Stores {
    pub carts: Arc<dyn CartStore>,
    pub orders: Arc<dyn OrderStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CartStore + OrderStore + OutboxStore + 'static,
    {
        Self {
            carts: store.clone(),
            orders: store.clone(),
            outbox: store,
        }
    }
}

/// External services the API talks to
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogGateway>,
    pub customers: Arc<dyn CustomerDirectory>,
    pub payments: BoxedPaymentStrategy,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub carts: CartService,
    pub checkout: Arc<CheckoutOrchestrator>,
    pub settlement: Arc<SettlementHandler>,
    pub orders: Arc<dyn OrderStore>,
    pub payments: BoxedPaymentStrategy,
    /// Application config
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire services from stores and collaborators.
    ///
    /// `dispatcher` is nudged after every committed settlement.
    pub fn new(
        config: AppConfig,
        stores: Stores,
        collaborators: Collaborators,
        dispatcher: Option<Arc<Notify>>,
    ) -> Self {
        let carts = CartService::new(
            stores.carts.clone(),
            collaborators.catalog.clone(),
            config.upstream_timeout,
        );

        let checkout = CheckoutOrchestrator::new(
            stores.carts,
            stores.orders.clone(),
            collaborators.catalog,
            collaborators.customers,
            collaborators.payments.clone(),
            config.checkout(),
        );

        let mut settlement = SettlementHandler::new(stores.orders.clone());
        if let Some(wakeup) = dispatcher {
            settlement = settlement.with_dispatcher(wakeup);
        }

        Self {
            carts,
            checkout: Arc::new(checkout),
            settlement: Arc::new(settlement),
            orders: stores.orders,
            payments: collaborators.payments,
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_app_config_defaults() {
        let config = AppConfig::from_lookup(ServicesFile::default(), lookup(&[]));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.currency, "inr");
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert_eq!(config.outbox.batch_size, 50);
        assert_eq!(config.outbox.max_attempts, 10);
        assert!(config.database_url.is_none());
        assert!(config.event_bridge_url.is_none());
    }

    #[test]
    fn test_env_overrides_services_file() {
        let services: ServicesFile = toml::from_str(
            r#"
            catalog_url = "http://catalog.internal"
            identity_url = "http://identity.internal"
            "#,
        )
        .unwrap();
        let config = AppConfig::from_lookup(
            services,
            lookup(&[
                ("IDENTITY_SERVICE_URL", "http://users:9000"),
                ("UPSTREAM_TIMEOUT_MS", "250"),
                ("CHECKOUT_CURRENCY", "USD"),
                ("OUTBOX_BATCH_SIZE", "5"),
            ]),
        );
        assert_eq!(config.catalog_service_url, "http://catalog.internal");
        assert_eq!(config.identity_service_url, "http://users:9000");
        assert_eq!(config.upstream_timeout, Duration::from_millis(250));
        assert_eq!(config.currency, "usd");
        assert_eq!(config.outbox.batch_size, 5);
    }

    #[test]
    fn test_outbox_sizes_never_zero() {
        let config = AppConfig::from_lookup(
            ServicesFile::default(),
            lookup(&[("OUTBOX_BATCH_SIZE", "0"), ("OUTBOX_MAX_ATTEMPTS", "0")]),
        );
        assert_eq!(config.outbox.batch_size, 1);
        assert_eq!(config.outbox.max_attempts, 1);
    }

    #[test]
    fn test_socket_addr() {
        let config = AppConfig::from_lookup(
            ServicesFile::default(),
            lookup(&[("HOST", "0.0.0.0"), ("PORT", "3000")]),
        );
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:3000");

        let bad = AppConfig::from_lookup(ServicesFile::default(), lookup(&[("HOST", "not a host")]));
        assert!(bad.socket_addr().is_err());
    }
}
