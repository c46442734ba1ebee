// ledger/src/resolver.rs
use std::sync::Arc;

use tracing::info;

use crate::{
    Account, AccountId, Customer, LedgerAdapter, LedgerError, Merchant, normalize_iban,
};

/// An account together with the customer and merchant that own it, read
/// fresh for one request.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub account: Account,
    pub customer: Customer,
    pub merchant: Merchant,
}

impl Resolved {
    /// Serialization key for the owning user.
    pub fn principal(&self) -> &str {
        &self.merchant.username
    }

    /// Status gates that must pass before money moves into this account.
    /// Inactivity is reported before a credit block.
    pub fn ensure_postable(&self) -> Result<(), LedgerError> {
        if !self.merchant.is_active() || !self.account.is_active() {
            info!(
                account = %self.account.iban,
                merchant = %self.merchant.id,
                "account or merchant inactive"
            );
            return Err(LedgerError::AccountInactive);
        }
        if self.merchant.credit_blocked {
            info!(merchant = %self.merchant.id, "merchant blocked for credit");
            return Err(LedgerError::BlockedAccount);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Resolver {
    adapter: Arc<dyn LedgerAdapter>,
}

impl Resolver {
    pub fn new(adapter: Arc<dyn LedgerAdapter>) -> Self {
        Self { adapter }
    }

    /// Resolve an external account identifier. Unknown identifiers, and
    /// accounts whose owner rows are missing, are `AccountNotFound`.
    pub async fn resolve(&self, iban: &str) -> Result<Resolved, LedgerError> {
        let normalized = normalize_iban(iban);
        if normalized.is_empty() {
            return Err(LedgerError::AccountNotFound(iban.to_string()));
        }
        let account = self
            .adapter
            .get_account_by_iban(&normalized)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(normalized.clone()))?;
        self.complete(account).await
    }

    pub async fn resolve_account(&self, id: AccountId) -> Result<Resolved, LedgerError> {
        let account = self
            .adapter
            .get_account(id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;
        self.complete(account).await
    }

    async fn complete(&self, account: Account) -> Result<Resolved, LedgerError> {
        let customer = self
            .adapter
            .get_customer(account.customer_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account.iban.clone()))?;
        let merchant = self
            .adapter
            .get_merchant(customer.merchant_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account.iban.clone()))?;

        Ok(Resolved {
            account,
            customer,
            merchant,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountStatus, MerchantStatus, adapters::MemoryAdapter};

    async fn seeded() -> (Arc<MemoryAdapter>, Resolved) {
        let adapter = Arc::new(MemoryAdapter::new());
        let merchant = Merchant::new("03001234567");
        let customer = Customer::new(merchant.id, "R-1", "3520200000000", "Ali Traders");
        let account =
            Account::new(customer.id, "PK36SCBL0000001123456702", "Ali Traders").activated();
        adapter.insert_merchant(merchant.clone()).await.unwrap();
        adapter.insert_customer(customer.clone()).await.unwrap();
        adapter.insert_account(account.clone()).await.unwrap();
        (
            adapter,
            Resolved {
                account,
                customer,
                merchant,
            },
        )
    }

    #[tokio::test]
    async fn test_resolve_normalizes_iban() {
        let (adapter, seeded) = seeded().await;
        let resolver = Resolver::new(adapter);

        let resolved = resolver.resolve("pk36 scbl 0000 0011 2345 6702").await.unwrap();
        assert_eq!(resolved.account.id, seeded.account.id);
        assert_eq!(resolved.principal(), "03001234567");
        assert!(resolved.ensure_postable().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (adapter, _) = seeded().await;
        let resolver = Resolver::new(adapter);
        assert!(matches!(
            resolver.resolve("PK00NOPE").await,
            Err(LedgerError::AccountNotFound(_))
        ));
        assert!(matches!(
            resolver.resolve("   ").await,
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_gates_are_read_fresh() {
        let (adapter, seeded) = seeded().await;
        let resolver = Resolver::new(adapter.clone());

        adapter
            .set_merchant_flags(seeded.merchant.id, MerchantStatus::Active, true)
            .await
            .unwrap();
        let resolved = resolver.resolve(&seeded.account.iban).await.unwrap();
        assert!(matches!(
            resolved.ensure_postable(),
            Err(LedgerError::BlockedAccount)
        ));

        adapter
            .set_account_status(seeded.account.id, AccountStatus::Inactive)
            .await
            .unwrap();
        let resolved = resolver.resolve(&seeded.account.iban).await.unwrap();
        assert!(matches!(
            resolved.ensure_postable(),
            Err(LedgerError::AccountInactive)
        ));
    }
}
