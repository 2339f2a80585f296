pub mod transaction;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::repositories::{MemoryStore, SeaOrmStore, Store};
use metrics::gauge;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub use transaction::TransactionCoordinator;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .sqlx_logging(true);

    gauge!("orders.db.max_connections", config.max_connections as f64);

    let pool = Database::connect(opt).await?;
    info!("Database connection pool established successfully");
    Ok(pool)
}

/// Runs the embedded migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let started = Instant::now();

    let result = crate::migrator::Migrator::up(pool, None).await;
    let elapsed = started.elapsed();
    match &result {
        Ok(_) => info!(
            "Database migrations completed successfully in {:?}",
            elapsed
        ),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result.map_err(ServiceError::from)
}

/// Opens the store selected by `database_url`: `memory://` yields the
/// in-memory store, anything else a sea-orm connection pool.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn Store>, ServiceError> {
    if config.uses_memory_store() {
        info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = establish_connection_with_config(&DbConfig::from(config)).await?;
    if config.auto_migrate {
        run_migrations(&pool).await?;
    }
    Ok(Arc::new(SeaOrmStore::new(pool)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_config_follows_app_config() {
        let app = AppConfig {
            database_url: "postgres://localhost/erp".into(),
            db_max_connections: 32,
            db_connect_timeout_secs: 5,
            ..AppConfig::default()
        };
        let cfg = DbConfig::from(&app);
        assert_eq!(cfg.url, "postgres://localhost/erp");
        assert_eq!(cfg.max_connections, 32);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn memory_url_opens_memory_store() {
        let store = open_store(&AppConfig::default()).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_product(uuid::Uuid::new_v4()).await.unwrap().is_none());
        tx.rollback().await.unwrap();
    }
}
