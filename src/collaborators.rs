// src/collaborators.rs
//! Services the gateway consults but does not own.
use std::collections::HashMap;

use async_trait::async_trait;
use ledger::LedgerError;

/// Remaining credit a principal may receive, in minor units.
#[async_trait]
pub trait LimitChecker: Send + Sync {
    async fn available_credit_limit(&self, principal: &str) -> Result<i64, LedgerError>;
}

/// Maps a bank institution code (IMD) to its display name.
#[async_trait]
pub trait BankDirectory: Send + Sync {
    async fn bank_name(&self, imd: &str) -> Result<Option<String>, LedgerError>;
}

/// Same ceiling for every principal.
pub struct FlatLimit(pub i64);

impl FlatLimit {
    pub fn unlimited() -> Self {
        Self(i64::MAX)
    }
}

#[async_trait]
impl LimitChecker for FlatLimit {
    async fn available_credit_limit(&self, _principal: &str) -> Result<i64, LedgerError> {
        Ok(self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticBankDirectory {
    banks: HashMap<String, String>,
}

impl StaticBankDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bank(mut self, imd: impl Into<String>, name: impl Into<String>) -> Self {
        self.banks.insert(imd.into(), name.into());
        self
    }

    /// Parse `imd=Name` pairs separated by commas.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut directory = Self::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (imd, name) = pair
                .split_once('=')
                .ok_or_else(|| format!("bank entry '{pair}' is not imd=name"))?;
            directory = directory.with_bank(imd.trim(), name.trim());
        }
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }
}

#[async_trait]
impl BankDirectory for StaticBankDirectory {
    async fn bank_name(&self, imd: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.banks.get(imd.trim()).cloned())
    }
}
