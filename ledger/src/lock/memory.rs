// ledger/src/lock/memory.rs
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Lease, PrincipalLock};
use crate::LedgerError;

/// Lock table for a single-process deployment.
#[derive(Clone, Default)]
pub struct MemoryPrincipalLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryPrincipalLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, principal: &str) -> bool {
        self.held.lock().contains(principal)
    }
}

struct MemoryLease {
    principal: String,
    held: Arc<Mutex<HashSet<String>>>,
    released: bool,
}

impl MemoryLease {
    fn free(&mut self) {
        if !self.released {
            self.held.lock().remove(&self.principal);
            self.released = true;
        }
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.free();
    }
}

#[async_trait]
impl Lease for MemoryLease {
    async fn release(&mut self) -> Result<(), LedgerError> {
        self.free();
        Ok(())
    }
}

#[async_trait]
impl PrincipalLock for MemoryPrincipalLock {
    async fn try_acquire(&self, principal: &str) -> Result<Option<Box<dyn Lease>>, LedgerError> {
        if !self.held.lock().insert(principal.to_string()) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLease {
            principal: principal.to_string(),
            held: Arc::clone(&self.held),
            released: false,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_fails_fast() {
        let lock = MemoryPrincipalLock::new();
        let first = lock.try_acquire("03001234567").await.unwrap();
        assert!(first.is_some());
        assert!(lock.try_acquire("03001234567").await.unwrap().is_none());
        assert!(lock.try_acquire("03111111111").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let lock = MemoryPrincipalLock::new();
        {
            let _lease = lock.try_acquire("03001234567").await.unwrap();
            assert!(lock.is_held("03001234567"));
        }
        assert!(!lock.is_held("03001234567"));
    }
}
