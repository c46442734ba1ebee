// ledger/src/adapters/memory.rs
use crate::{
    Account, AccountId, AccountStatus, Action, ActionId, Customer, CustomerId, ExecutionPlan, Gate,
    LedgerAdapter, LedgerError, Merchant, MerchantId, MerchantStatus, Operation, Receipt,
    Transaction, TransactionId, TransactionType, action::cap_debug_balance,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct MemoryStore {
    merchants: HashMap<MerchantId, Merchant>,
    customers: HashMap<CustomerId, Customer>,
    accounts: HashMap<AccountId, Account>,
    actions: HashMap<ActionId, Action>,
    /// Posting order, so the action log reads back oldest first.
    action_log: Vec<ActionId>,
    user_friendly_ids: HashSet<String>,
    transactions: HashMap<TransactionId, Transaction>,
}

impl MemoryStore {
    fn rrn_taken(&self, rrn: &str) -> bool {
        self.transactions
            .values()
            .any(|t| t.kind.is_rrn_unique() && t.rrn.as_deref() == Some(rrn))
    }

    fn reversal_taken(&self, account_id: AccountId, reference: &str) -> bool {
        self.transactions.values().any(|t| {
            t.kind == TransactionType::Reversal
                && t.account_id == account_id
                && t.reference.as_deref() == Some(reference)
        })
    }

    fn recorded_for(&self, action_id: ActionId) -> bool {
        self.transactions.values().any(|t| t.action_id == action_id)
    }
}

/// Changes made by a plan that has not committed yet.
#[derive(Default)]
struct Staged {
    merchants: HashMap<MerchantId, Merchant>,
    actions: HashMap<ActionId, Action>,
    posted: Vec<ActionId>,
    annotated: Vec<ActionId>,
    transactions: Vec<Transaction>,
}

impl Staged {
    fn action(&self, store: &MemoryStore, id: ActionId) -> Option<Action> {
        self.actions
            .get(&id)
            .or_else(|| store.actions.get(&id))
            .cloned()
    }
}

/// Single-process adapter. One mutex guards the whole store, so a plan
/// holding it is serialized against every other plan.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(
        store: &MemoryStore,
        plan: &ExecutionPlan,
        locks: &[MerchantId],
    ) -> Result<Staged, LedgerError> {
        let mut staged = Staged::default();

        // Step 1: take the merchant rows the plan moves
        for id in locks {
            let merchant = store
                .merchants
                .get(id)
                .cloned()
                .ok_or_else(|| LedgerError::Storage(format!("merchant {id} missing")))?;
            staged.merchants.insert(*id, merchant);
        }

        // Step 2: apply operations in order against the overlay
        for op in plan.operations() {
            match op {
                Operation::Post { action, gate } => {
                    if staged.action(store, action.id).is_some()
                        || store.user_friendly_ids.contains(&action.user_friendly_id)
                    {
                        return Err(LedgerError::Conflict(format!(
                            "action {} already exists",
                            action.id
                        )));
                    }

                    let merchant = staged.merchants.get_mut(&action.merchant_id).ok_or_else(
                        || LedgerError::Storage(format!("merchant {} not locked", action.merchant_id)),
                    )?;
                    let balance = merchant
                        .current_balance
                        .checked_add(action.delta)
                        .ok_or(LedgerError::InvalidAmount)?;

                    let account = match gate {
                        Gate::Credit { account_id } => store.accounts.get(account_id),
                        _ => None,
                    };
                    gate.check(merchant, account, balance)?;

                    merchant.current_balance = balance;
                    let mut posted = action.clone();
                    posted.debug_balance = cap_debug_balance(balance);
                    staged.actions.insert(posted.id, posted);
                    staged.posted.push(action.id);
                }
                Operation::Annotate(annotation) => {
                    let mut action =
                        staged.action(store, annotation.action_id).ok_or_else(|| {
                            LedgerError::Conflict(format!(
                                "action {} not found for annotation",
                                annotation.action_id
                            ))
                        })?;
                    annotation.apply_to(&mut action)?;
                    if !staged.posted.contains(&action.id) && !staged.annotated.contains(&action.id)
                    {
                        staged.annotated.push(action.id);
                    }
                    staged.actions.insert(action.id, action);
                }
                Operation::Record { transaction } => {
                    if staged.action(store, transaction.action_id).is_none() {
                        return Err(LedgerError::Conflict(format!(
                            "transaction {} has no owning action",
                            transaction.id
                        )));
                    }
                    if store.recorded_for(transaction.action_id)
                        || staged
                            .transactions
                            .iter()
                            .any(|t| t.action_id == transaction.action_id)
                    {
                        return Err(LedgerError::Conflict(format!(
                            "action {} already has a transaction",
                            transaction.action_id
                        )));
                    }

                    if let (true, Some(rrn)) =
                        (transaction.kind.is_rrn_unique(), transaction.rrn.as_deref())
                    {
                        let staged_dup = staged
                            .transactions
                            .iter()
                            .any(|t| t.kind.is_rrn_unique() && t.rrn.as_deref() == Some(rrn));
                        if staged_dup || store.rrn_taken(rrn) {
                            return Err(LedgerError::DuplicatePayment(rrn.to_string()));
                        }
                    }

                    if transaction.kind == TransactionType::Reversal {
                        if let Some(reference) = transaction.reference.as_deref() {
                            let staged_dup = staged.transactions.iter().any(|t| {
                                t.kind == TransactionType::Reversal
                                    && t.account_id == transaction.account_id
                                    && t.reference.as_deref() == Some(reference)
                            });
                            if staged_dup
                                || store.reversal_taken(transaction.account_id, reference)
                            {
                                return Err(LedgerError::AlreadyReturned);
                            }
                        }
                    }

                    staged.transactions.push(transaction.clone());
                }
            }
        }

        Ok(staged)
    }
}

#[async_trait]
impl LedgerAdapter for MemoryAdapter {
    async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        locks: &[MerchantId],
    ) -> Result<Receipt, LedgerError> {
        let mut store = self.store.lock();

        // Nothing touches the store until every operation has been staged
        let staged = Self::stage(&store, plan, locks)?;

        let posted = staged
            .posted
            .iter()
            .filter_map(|id| staged.actions.get(id).cloned())
            .collect();
        let annotated = staged
            .annotated
            .iter()
            .filter_map(|id| staged.actions.get(id).cloned())
            .collect();

        store.merchants.extend(staged.merchants);
        for id in &staged.posted {
            store.action_log.push(*id);
            if let Some(action) = staged.actions.get(id) {
                store.user_friendly_ids.insert(action.user_friendly_id.clone());
            }
        }
        store.actions.extend(staged.actions);
        for transaction in &staged.transactions {
            store.transactions.insert(transaction.id, transaction.clone());
        }

        Ok(Receipt {
            posted,
            annotated,
            recorded: staged.transactions,
        })
    }

    async fn get_merchant(&self, id: MerchantId) -> Result<Option<Merchant>, LedgerError> {
        Ok(self.store.lock().merchants.get(&id).cloned())
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, LedgerError> {
        Ok(self.store.lock().customers.get(&id).cloned())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        Ok(self.store.lock().accounts.get(&id).cloned())
    }

    async fn get_account_by_iban(&self, iban: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self
            .store
            .lock()
            .accounts
            .values()
            .find(|a| a.iban == iban)
            .cloned())
    }

    async fn get_action(&self, id: ActionId) -> Result<Option<Action>, LedgerError> {
        Ok(self.store.lock().actions.get(&id).cloned())
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.store.lock().transactions.get(&id).cloned())
    }

    async fn transaction_for_action(
        &self,
        action_id: ActionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .store
            .lock()
            .transactions
            .values()
            .find(|t| t.action_id == action_id)
            .cloned())
    }

    async fn find_by_payment_identifier(
        &self,
        account_id: AccountId,
        payment_identifier: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .store
            .lock()
            .transactions
            .values()
            .find(|t| {
                t.account_id == account_id
                    && t.kind == TransactionType::Debit
                    && t.payment_identifier.as_deref() == Some(payment_identifier)
            })
            .cloned())
    }

    async fn rrn_exists(&self, rrn: &str) -> Result<bool, LedgerError> {
        Ok(self
            .store
            .lock()
            .transactions
            .values()
            .any(|t| t.rrn.as_deref() == Some(rrn)))
    }

    async fn reversal_exists(
        &self,
        account_id: AccountId,
        reference: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self.store.lock().reversal_taken(account_id, reference))
    }

    async fn actions_for_merchant(&self, id: MerchantId) -> Result<Vec<Action>, LedgerError> {
        let store = self.store.lock();
        Ok(store
            .action_log
            .iter()
            .filter_map(|action_id| store.actions.get(action_id))
            .filter(|a| a.merchant_id == id)
            .cloned()
            .collect())
    }

    async fn insert_merchant(&self, merchant: Merchant) -> Result<(), LedgerError> {
        let mut store = self.store.lock();
        if store.merchants.contains_key(&merchant.id) {
            return Err(LedgerError::Conflict(format!(
                "merchant {} already exists",
                merchant.id
            )));
        }
        store.merchants.insert(merchant.id, merchant);
        Ok(())
    }

    async fn insert_customer(&self, customer: Customer) -> Result<(), LedgerError> {
        let mut store = self.store.lock();
        if !store.merchants.contains_key(&customer.merchant_id) {
            return Err(LedgerError::Storage(format!(
                "merchant {} missing",
                customer.merchant_id
            )));
        }
        if store
            .customers
            .values()
            .any(|c| c.merchant_id == customer.merchant_id)
        {
            return Err(LedgerError::Conflict(format!(
                "merchant {} already has a customer",
                customer.merchant_id
            )));
        }
        store.customers.insert(customer.id, customer);
        Ok(())
    }

    async fn insert_account(&self, account: Account) -> Result<(), LedgerError> {
        let mut store = self.store.lock();
        if !store.customers.contains_key(&account.customer_id) {
            return Err(LedgerError::Storage(format!(
                "customer {} missing",
                account.customer_id
            )));
        }
        if store.accounts.values().any(|a| a.iban == account.iban) {
            return Err(LedgerError::Conflict(format!(
                "iban {} already registered",
                account.iban
            )));
        }
        store.accounts.insert(account.id, account);
        Ok(())
    }

    async fn set_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<(), LedgerError> {
        let mut store = self.store.lock();
        let account = store
            .accounts
            .get_mut(&id)
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;
        account.status = status;
        Ok(())
    }

    async fn set_merchant_flags(
        &self,
        id: MerchantId,
        status: MerchantStatus,
        credit_blocked: bool,
    ) -> Result<(), LedgerError> {
        let mut store = self.store.lock();
        let merchant = store
            .merchants
            .get_mut(&id)
            .ok_or_else(|| LedgerError::Storage(format!("merchant {id} missing")))?;
        merchant.status = status;
        merchant.credit_blocked = credit_blocked;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionStatus, ActionType, Annotation};

    async fn seeded() -> (MemoryAdapter, Merchant) {
        let adapter = MemoryAdapter::new();
        let merchant = Merchant::new("03001234567");
        adapter.insert_merchant(merchant.clone()).await.unwrap();
        (adapter, merchant)
    }

    #[tokio::test]
    async fn test_failed_plan_leaves_no_trace() {
        let (adapter, merchant) = seeded().await;

        let deposit = Action::new(merchant.id, ActionType::Deposited, 500);
        let missing = Annotation::on(uuid::Uuid::now_v7()).status(ActionStatus::Failed);

        let mut plan = ExecutionPlan::new();
        plan.post(deposit.clone(), Gate::Open).annotate(missing);

        let result = adapter.execute_plan(&plan, &plan.calculate_locks()).await;
        assert!(matches!(result, Err(LedgerError::Conflict(_))));

        let stored = adapter.get_merchant(merchant.id).await.unwrap().unwrap();
        assert_eq!(stored.current_balance, 0);
        assert!(adapter.get_action(deposit.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_post_sets_balance_snapshot() {
        let (adapter, merchant) = seeded().await;

        let mut plan = ExecutionPlan::new();
        plan.post(
            Action::new(merchant.id, ActionType::Deposited, 700),
            Gate::Open,
        );
        let receipt = adapter
            .execute_plan(&plan, &plan.calculate_locks())
            .await
            .unwrap();

        assert_eq!(receipt.posted[0].debug_balance, 700);
        let log = adapter.actions_for_merchant(merchant.id).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_funds_gate_blocks_overdraft() {
        let (adapter, merchant) = seeded().await;

        let mut plan = ExecutionPlan::new();
        plan.post(
            Action::new(merchant.id, ActionType::Withdraw, -1),
            Gate::Funds,
        );
        let result = adapter.execute_plan(&plan, &plan.calculate_locks()).await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds)));
    }
}
