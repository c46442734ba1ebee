// ledger/src/idempotency.rs
use std::sync::Arc;

use tracing::info;

use crate::{LedgerAdapter, LedgerError};

/// Rejects settlement instructions whose rrn is already on the ledger.
///
/// The check reads committed rows through the adapter on every call; no
/// cache sits in front of it. The unique rrn index enforced inside
/// `execute_plan` closes the window between this read and the commit.
#[derive(Clone)]
pub struct IdempotencyGuard {
    adapter: Arc<dyn LedgerAdapter>,
}

impl IdempotencyGuard {
    pub fn new(adapter: Arc<dyn LedgerAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn is_duplicate(&self, rrn: &str) -> Result<bool, LedgerError> {
        self.adapter.rrn_exists(rrn).await
    }

    /// `Err(DuplicatePayment)` when `rrn` has been seen, `Ok` otherwise.
    pub async fn ensure_fresh(&self, rrn: &str) -> Result<(), LedgerError> {
        if rrn.trim().is_empty() {
            return Err(LedgerError::MissingField("rrn"));
        }
        if self.is_duplicate(rrn).await? {
            info!(rrn, "duplicate settlement instruction rejected");
            return Err(LedgerError::DuplicatePayment(rrn.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Account, Action, ActionType, Customer, ExecutionPlan, Gate, Merchant, RailIds,
        Transaction, TransactionType, adapters::MemoryAdapter,
    };

    #[tokio::test]
    async fn test_guard_sees_committed_rrn() {
        let adapter = Arc::new(MemoryAdapter::new());
        let merchant = Merchant::new("03001234567");
        let customer = Customer::new(merchant.id, "R-1", "3520200000000", "Ali");
        let account = Account::new(customer.id, "PK36SCBL0000001123456702", "Ali").activated();
        adapter.insert_merchant(merchant.clone()).await.unwrap();
        adapter.insert_customer(customer).await.unwrap();
        adapter.insert_account(account.clone()).await.unwrap();

        let guard = IdempotencyGuard::new(adapter.clone());
        assert!(guard.ensure_fresh("RRN-1").await.is_ok());

        let action = Action::new(merchant.id, ActionType::Deposited, 100);
        let tx = Transaction::for_action(
            TransactionType::Credit,
            account.id,
            &action,
            100,
            &account.iban,
            "HBL",
        )
        .rail_ids(RailIds {
            rrn: Some("RRN-1".into()),
            ..Default::default()
        });
        let mut plan = ExecutionPlan::new();
        plan.post(action, Gate::Open).record(tx);
        adapter
            .execute_plan(&plan, &plan.calculate_locks())
            .await
            .unwrap();

        assert!(guard.is_duplicate("RRN-1").await.unwrap());
        assert!(matches!(
            guard.ensure_fresh("RRN-1").await,
            Err(LedgerError::DuplicatePayment(_))
        ));
        assert!(matches!(
            guard.ensure_fresh("  ").await,
            Err(LedgerError::MissingField("rrn"))
        ));
    }
}
