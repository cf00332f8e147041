use std::{sync::Arc, time::Duration};

use dompet_core::{StorageBackend, StorageError};
use dompet_memory::InMemoryStorage;
use dompet_postgres::PostgresStorage;
use dompet_sqlite::SqliteStorage;

use crate::config::{BackendKind, StorageConfig};

/// Opens the configured backend. Blocking: the PostgreSQL client must not be
/// created from inside an async task.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::Memory => Arc::new(InMemoryStorage::new()),
        BackendKind::Sqlite => Arc::new(SqliteStorage::with_busy_timeout(
            &config.path,
            Duration::from_millis(config.busy_timeout_ms),
        )?),
        BackendKind::Postgres => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| StorageError::Other("storage.url is required for the postgres backend".to_string()))?;
            Arc::new(PostgresStorage::with_options(
                url,
                config.pool_size,
                Duration::from_millis(config.lock_timeout_ms),
            )?)
        }
    };
    tracing::info!(backend = backend.name(), "storage backend ready");
    Ok(backend)
}
