//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::interfaces::LedgerStore;

pub mod schema;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedgerStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresLedgerStore;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockLedgerStore;

/// Initialize storage based on configuration.
///
/// Returns a LedgerStore implementation for the configured backend, with
/// tables created.
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    match config.storage_type {
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!("Storage: sqlite at {}", config.sqlite.path);

            if let Some(parent) = std::path::Path::new(&config.sqlite.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.sqlite.path))
                    .await?;

            let store = Arc::new(SqliteLedgerStore::new(pool));
            store.init().await?;
            Ok(store as Arc<dyn LedgerStore>)
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            Err("SQLite storage requested but 'sqlite' feature is not enabled".into())
        }
        #[cfg(feature = "postgres")]
        StorageType::Postgres => {
            info!("Storage: postgres at {}", config.postgres.uri);

            let pool = sqlx::PgPool::connect(&config.postgres.uri).await?;

            let store = Arc::new(PostgresLedgerStore::new(pool));
            store.init().await?;
            Ok(store as Arc<dyn LedgerStore>)
        }
        #[cfg(not(feature = "postgres"))]
        StorageType::Postgres => {
            Err("PostgreSQL storage requested but 'postgres' feature is not enabled".into())
        }
    }
}
