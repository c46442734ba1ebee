// src/bootstrap.rs
//! Wires a [`Gateway`] from a [`GatewayConfig`].
use std::sync::Arc;

use ledger::adapters::{MemoryAdapter, PostgresAdapter};
use ledger::{
    Ledger, LedgerAdapter, LedgerError, MemoryPrincipalLock, Notifier, PostgresPrincipalLock,
    PrincipalLock, RedisPrincipalLock, Serializer,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;

use crate::collaborators::FlatLimit;
use crate::config::{ConfigError, GatewayConfig, LockBackend};
use crate::gateway::Gateway;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

async fn connect_pool(url: &str, max_connections: u32) -> Result<PgPool, BootstrapError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Build the gateway the configuration describes. The Postgres schema is
/// created if missing.
pub async fn connect(
    config: &GatewayConfig,
    notifier: Arc<dyn Notifier>,
) -> Result<Gateway, BootstrapError> {
    config.validate()?;

    let pool = match &config.database_url {
        Some(url) => Some(connect_pool(url, config.db_max_connections).await?),
        None => None,
    };

    let adapter: Arc<dyn LedgerAdapter> = match &pool {
        Some(pool) => {
            let adapter = PostgresAdapter::from_pool(pool.clone());
            adapter.init_schema().await?;
            Arc::new(adapter)
        }
        None => Arc::new(MemoryAdapter::new()),
    };

    // Leases pin a connection each; they get a pool apart from the ledger's.
    let lock: Arc<dyn PrincipalLock> = match (
        config.lock_backend,
        &config.database_url,
        &config.redis_url,
    ) {
        (LockBackend::Postgres, Some(url), _) => {
            let lock_pool = connect_pool(url, config.lock_max_connections).await?;
            Arc::new(PostgresPrincipalLock::from_pool(lock_pool))
        }
        (LockBackend::Redis, _, Some(url)) => {
            Arc::new(RedisPrincipalLock::connect(url, config.lock_ttl()).await?)
        }
        (LockBackend::Postgres, None, _) => {
            return Err(ConfigError::Missing("RAAST_DATABASE_URL").into());
        }
        (LockBackend::Redis, _, None) => return Err(ConfigError::Missing("RAAST_REDIS_URL").into()),
        (LockBackend::Memory, _, _) => Arc::new(MemoryPrincipalLock::new()),
    };

    info!(
        storage = if pool.is_some() { "postgres" } else { "memory" },
        lock = ?config.lock_backend,
        exemptions = config.lock_exemptions.len(),
        "gateway configured"
    );

    let ledger = Ledger::new(adapter)
        .with_notifier(notifier)
        .with_options(config.ledger_options());
    let serializer = Serializer::new(lock, config.lock_exemptions.clone());

    let limits = match config.credit_limit {
        Some(limit) => FlatLimit(limit),
        None => FlatLimit::unlimited(),
    };

    Ok(Gateway::new(ledger, serializer)
        .with_limits(Arc::new(limits))
        .with_banks(Arc::new(config.bank_directory()?))
        .with_reversal_bank_name(config.reversal_bank_name.clone()))
}
