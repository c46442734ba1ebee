// ledger/src/lib.rs
pub mod account;
pub mod action;
pub mod adapters;
pub mod amount;
pub mod compensation;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod lock;
pub mod merchant;
pub mod notify;
pub mod plan;
pub mod resolver;
pub mod transaction;

pub use account::{Account, AccountId, AccountStatus, normalize_iban};
pub use action::{Action, ActionId, ActionStatus, ActionType, ReferenceType};
pub use amount::Amount;
pub use engine::{
    CreditInstruction, Ledger, LedgerOptions, Reconciliation, ReversalInstruction, Settlement,
    WithdrawInstruction, WithdrawOutcome, WithdrawResult,
};
pub use error::{ErrorClass, LedgerError};
pub use idempotency::IdempotencyGuard;
pub use lock::{
    Exemption, Lease, MemoryPrincipalLock, MethodMatch, PostgresPrincipalLock, PrincipalLock,
    RedisPrincipalLock, Route, Serializer,
};
pub use merchant::{Customer, CustomerId, Merchant, MerchantId, MerchantStatus};
pub use notify::{DepositNotification, LogNotifier, Notifier, NoopNotifier};
pub use plan::{Annotation, ExecutionPlan, Gate, Operation, Receipt};
pub use resolver::{Resolved, Resolver};
pub use transaction::{RailIds, Transaction, TransactionId, TransactionType};

use async_trait::async_trait;

/// Stable 64-bit key for a principal, for lock backends keyed by integer.
pub(crate) fn hash_lock_key(principal: &str) -> i64 {
    let digest = blake3::hash(principal.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_be_bytes(head)
}

/// Storage behind the ledger.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Execute the complete plan atomically.
    /// Implementors MUST:
    /// 1. BEGIN a unit of work
    /// 2. lock the merchant rows named by `locks`, in order
    /// 3. re-check every `Gate` against the locked rows
    /// 4. apply postings, annotations and records, enforcing the rrn,
    ///    reversal-reference and one-record-per-action uniqueness rules
    /// 5. COMMIT on success, ROLLBACK on any error
    async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        locks: &[MerchantId],
    ) -> Result<Receipt, LedgerError>;

    // READ OPERATIONS
    async fn get_merchant(&self, id: MerchantId) -> Result<Option<Merchant>, LedgerError>;
    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, LedgerError>;
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError>;
    async fn get_account_by_iban(&self, iban: &str) -> Result<Option<Account>, LedgerError>;
    async fn get_action(&self, id: ActionId) -> Result<Option<Action>, LedgerError>;
    async fn get_transaction(&self, id: TransactionId)
    -> Result<Option<Transaction>, LedgerError>;
    async fn transaction_for_action(
        &self,
        action_id: ActionId,
    ) -> Result<Option<Transaction>, LedgerError>;
    async fn find_by_payment_identifier(
        &self,
        account_id: AccountId,
        payment_identifier: &str,
    ) -> Result<Option<Transaction>, LedgerError>;
    /// Any committed transaction, of any type, carrying `rrn`.
    async fn rrn_exists(&self, rrn: &str) -> Result<bool, LedgerError>;
    async fn reversal_exists(
        &self,
        account_id: AccountId,
        reference: &str,
    ) -> Result<bool, LedgerError>;
    /// Every action posted for a merchant, oldest first.
    async fn actions_for_merchant(&self, id: MerchantId) -> Result<Vec<Action>, LedgerError>;

    // ONBOARDING
    async fn insert_merchant(&self, merchant: Merchant) -> Result<(), LedgerError>;
    async fn insert_customer(&self, customer: Customer) -> Result<(), LedgerError>;
    async fn insert_account(&self, account: Account) -> Result<(), LedgerError>;
    async fn set_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<(), LedgerError>;
    async fn set_merchant_flags(
        &self,
        id: MerchantId,
        status: MerchantStatus,
        credit_blocked: bool,
    ) -> Result<(), LedgerError>;
}
