// ledger/src/lock/postgres.rs
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use tracing::debug;

use super::{Lease, PrincipalLock};
use crate::{LedgerError, hash_lock_key};

/// Transaction-scoped advisory lock. Each lease pins one pooled
/// connection inside an open transaction; ending the transaction, by
/// release or by drop, frees the lock.
///
/// The pool must not be the one the ledger adapter uses: a request holds
/// its lease while the ledger acquires connections of its own.
#[derive(Clone)]
pub struct PostgresPrincipalLock {
    pool: PgPool,
}

impl PostgresPrincipalLock {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PostgresLease {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

#[async_trait]
impl Lease for PostgresLease {
    async fn release(&mut self) -> Result<(), LedgerError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PrincipalLock for PostgresPrincipalLock {
    async fn try_acquire(&self, principal: &str) -> Result<Option<Box<dyn Lease>>, LedgerError> {
        let key = hash_lock_key(principal);
        let mut tx = self.pool.begin().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;

        if !acquired {
            debug!(principal, key, "advisory lock held elsewhere");
            tx.rollback().await?;
            return Ok(None);
        }

        Ok(Some(Box::new(PostgresLease { tx: Some(tx) })))
    }
}
