// ledger/src/engine.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::compensation::{Compensation, ensure_not_returned};
use crate::{
    AccountId, Action, ActionId, ActionStatus, ActionType, Amount, Annotation, DepositNotification,
    ExecutionPlan, Gate, IdempotencyGuard, LedgerAdapter, LedgerError, Merchant, MerchantId,
    NoopNotifier, Notifier, RailIds, Receipt, ReferenceType, Resolver, Transaction, TransactionId,
    TransactionType,
};

const PARTNER: &str = "raast";

#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Upper bound on one notification attempt.
    pub notify_timeout: Duration,
    /// Failure reason written on a withdraw reversed by the rail.
    pub reversal_failure_reason: String,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            notify_timeout: Duration::from_millis(5_000),
            reversal_failure_reason: "Raast Service Error".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreditInstruction {
    pub amount: Amount,
    pub account_id: AccountId,
    pub from_iban: Option<String>,
    pub bank_name: String,
    pub rail: RailIds,
    pub sender_name: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WithdrawInstruction {
    pub amount: Amount,
    pub account_id: AccountId,
    pub destination_iban: String,
    pub bank_name: String,
}

/// Upstream outcome of a withdraw previously initiated with
/// [`Ledger::withdraw`].
#[derive(Debug, Clone)]
pub struct WithdrawResult {
    pub withdraw_id: ActionId,
    pub account_id: AccountId,
    pub amount: Amount,
    pub destination_iban: String,
    pub bank_name: String,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub rail: RailIds,
}

#[derive(Debug, Clone)]
pub struct ReversalInstruction {
    pub amount: Amount,
    pub account_id: AccountId,
    /// Internal id of the DEBIT being reversed.
    pub original: TransactionId,
    pub bank_name: String,
    pub rail: RailIds,
    /// Defaults to the account's own IBAN.
    pub destination_iban: Option<String>,
}

/// An action and the settlement record it owns, as committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub action: Action,
    pub transaction: Transaction,
}

impl Settlement {
    fn from_receipt(receipt: &Receipt, action_id: ActionId) -> Result<Self, LedgerError> {
        let action = receipt.action(action_id).cloned();
        let transaction = receipt.recorded_for(action_id).cloned();
        match (action, transaction) {
            (Some(action), Some(transaction)) => Ok(Self {
                action,
                transaction,
            }),
            _ => Err(LedgerError::Storage(format!(
                "receipt missing settlement for action {action_id}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WithdrawOutcome {
    Completed(Settlement),
    /// Upstream failed; the withdraw was compensated by `refund`.
    Failed { refund: Settlement },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub merchant_id: MerchantId,
    pub cached_balance: i64,
    pub ledger_balance: i64,
    pub actions: usize,
}

impl Reconciliation {
    pub fn drift(&self) -> i64 {
        self.cached_balance - self.ledger_balance
    }

    pub fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}

/// The only entry point through which a merchant balance moves.
#[derive(Clone)]
pub struct Ledger {
    adapter: Arc<dyn LedgerAdapter>,
    notifier: Arc<dyn Notifier>,
    options: LedgerOptions,
}

impl Ledger {
    pub fn new(adapter: Arc<dyn LedgerAdapter>) -> Self {
        Self {
            adapter,
            notifier: Arc::new(NoopNotifier),
            options: LedgerOptions::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_options(mut self, options: LedgerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn adapter(&self) -> &dyn LedgerAdapter {
        self.adapter.as_ref()
    }

    pub fn adapter_arc(&self) -> Arc<dyn LedgerAdapter> {
        Arc::clone(&self.adapter)
    }

    pub fn guard(&self) -> IdempotencyGuard {
        IdempotencyGuard::new(self.adapter_arc())
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.adapter_arc())
    }

    /// Execute `plan` as one unit of work and record the outcome.
    async fn commit(
        &self,
        op: &'static str,
        plan: ExecutionPlan,
        amount: Amount,
    ) -> Result<Receipt, LedgerError> {
        let locks = plan.calculate_locks();
        let result = self.adapter.execute_plan(&plan, &locks).await;

        counter!("ledger.operations.total",
            "op" => op,
            "status" => if result.is_ok() { "success" } else { "failed" }
        )
        .increment(1);
        if result.is_ok() {
            histogram!("ledger.operation.amount", "op" => op).record(amount.minor() as f64);
        }

        result
    }

    /// Deposit `amount` into the account's merchant and record the CREDIT.
    ///
    /// The notification is sent after commit on a detached task; its
    /// failure is logged and never affects the returned settlement.
    pub async fn credit(&self, instruction: CreditInstruction) -> Result<Settlement, LedgerError> {
        let rrn = instruction
            .rail
            .rrn
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or(LedgerError::MissingField("rrn"))?
            .to_string();

        let resolved = self.resolver().resolve_account(instruction.account_id).await?;
        resolved.ensure_postable()?;

        let action = Action::new(
            resolved.merchant.id,
            ActionType::Deposited,
            instruction.amount.credit(),
        )
        .self_referenced(ReferenceType::BankTransfer)
        .with_comment(instruction.comment.unwrap_or_default())
        .with_bank(instruction.bank_name.clone())
        .with_remote_reference(Some(rrn.clone()))
        .with_partner(PARTNER);
        let action_id = action.id;

        let transaction = Transaction::for_action(
            TransactionType::Credit,
            resolved.account.id,
            &action,
            instruction.amount.minor(),
            &resolved.account.iban,
            instruction.bank_name,
        )
        .from_iban(instruction.from_iban)
        .reference(action.reference.clone())
        .sender(instruction.sender_name)
        .rail_ids(instruction.rail);

        let mut plan = ExecutionPlan::new();
        plan.post(
            action,
            Gate::Credit {
                account_id: resolved.account.id,
            },
        )
        .record(transaction);

        let receipt = self.commit("credit", plan, instruction.amount).await?;
        let settlement = Settlement::from_receipt(&receipt, action_id)?;

        info!(
            rrn = %rrn,
            account = %resolved.account.iban,
            merchant = %resolved.merchant.id,
            amount = instruction.amount.minor(),
            transaction = %settlement.transaction.id,
            "credit settled"
        );

        self.spawn_deposit_notification(DepositNotification::for_credit(
            &resolved.merchant,
            &settlement.action,
            &settlement.transaction,
        ));

        Ok(settlement)
    }

    /// Start a withdraw: debit the merchant now with a PENDING action that
    /// [`Ledger::process_withdraw`] later settles or compensates.
    pub async fn withdraw(&self, instruction: WithdrawInstruction) -> Result<Action, LedgerError> {
        let resolved = self.resolver().resolve_account(instruction.account_id).await?;
        if !resolved.merchant.is_active() || !resolved.account.is_active() {
            return Err(LedgerError::AccountInactive);
        }

        let action = Action::new(
            resolved.merchant.id,
            ActionType::Withdraw,
            instruction.amount.debit(),
        )
        .with_status(ActionStatus::Pending)
        .self_referenced(ReferenceType::BankTransfer)
        .with_comment(json!({ "to_iban": instruction.destination_iban }).to_string())
        .with_bank(instruction.bank_name)
        .with_partner(PARTNER);
        let action_id = action.id;

        let mut plan = ExecutionPlan::new();
        plan.post(action, Gate::Funds);

        let receipt = self.commit("withdraw", plan, instruction.amount).await?;
        let action = receipt
            .action(action_id)
            .cloned()
            .ok_or_else(|| LedgerError::Storage(format!("receipt missing action {action_id}")))?;

        info!(
            merchant = %resolved.merchant.id,
            amount = instruction.amount.minor(),
            withdraw = %action.id,
            "withdraw initiated"
        );
        Ok(action)
    }

    /// Settle a pending withdraw. On upstream success the withdraw is
    /// COMPLETED and a DEBIT recorded; on failure it is compensated.
    pub async fn process_withdraw(
        &self,
        result: WithdrawResult,
    ) -> Result<WithdrawOutcome, LedgerError> {
        let resolved = self.resolver().resolve_account(result.account_id).await?;

        let withdraw = self
            .adapter
            .get_action(result.withdraw_id)
            .await?
            .filter(|a| a.merchant_id == resolved.merchant.id && a.kind.is_withdrawal())
            .ok_or(LedgerError::WithdrawNotFound(result.withdraw_id))?;
        if !withdraw.is_pending() {
            // Compensation moved the reference to the refund id; the
            // REVERSAL row sits on the refund action.
            if let Some(linked) = withdraw.linked_action {
                let returned = self
                    .adapter
                    .transaction_for_action(linked)
                    .await?
                    .is_some_and(|t| t.kind == TransactionType::Reversal);
                if returned {
                    info!(withdraw = %withdraw.id, refund = %linked, "withdraw already returned");
                    return Err(LedgerError::AlreadyReturned);
                }
            }
            return Err(LedgerError::WithdrawNotPending(withdraw.id));
        }

        if !result.success {
            let reason = result
                .failure_reason
                .unwrap_or_else(|| self.options.reversal_failure_reason.clone());
            ensure_not_returned(self.adapter(), &resolved.account, &withdraw.reference).await?;

            let compensation = Compensation::for_withdraw(
                &withdraw,
                &resolved.account,
                &reason,
                &result.bank_name,
                result.rail,
            )?;
            let refund_id = compensation.refund.id;
            let refund_amount = Amount::new(withdraw.magnitude())?;

            let receipt = self
                .commit("compensate", compensation.into_plan(), refund_amount)
                .await?;
            let refund = Settlement::from_receipt(&receipt, refund_id)?;

            warn!(
                withdraw = %withdraw.id,
                refund = %refund_id,
                merchant = %resolved.merchant.id,
                reason = %reason,
                "withdraw failed upstream, compensated"
            );
            return Ok(WithdrawOutcome::Failed { refund });
        }

        if result.amount.minor() != withdraw.magnitude() {
            info!(
                withdraw = %withdraw.id,
                expected = withdraw.magnitude(),
                received = result.amount.minor(),
                "withdraw result amount mismatch"
            );
            return Err(LedgerError::InvalidAmount);
        }

        let transaction = Transaction::for_action(
            TransactionType::Debit,
            resolved.account.id,
            &withdraw,
            result.amount.minor(),
            result.destination_iban,
            result.bank_name,
        )
        .from_iban(Some(resolved.account.iban.clone()))
        .reference(withdraw.reference.clone())
        .rail_ids(result.rail);

        let mut plan = ExecutionPlan::new();
        plan.annotate(Annotation::on(withdraw.id).status(ActionStatus::Completed))
            .record(transaction);

        let receipt = self.commit("process_withdraw", plan, result.amount).await?;
        let settlement = Settlement::from_receipt(&receipt, withdraw.id)?;

        info!(
            withdraw = %withdraw.id,
            transaction = %settlement.transaction.id,
            "withdraw settled"
        );
        Ok(WithdrawOutcome::Completed(settlement))
    }

    /// Return a settled withdraw to the merchant at the rail's request.
    ///
    /// At most one REVERSAL exists per original settlement reference; a
    /// second attempt is `AlreadyReturned`. The withdraw's reference is
    /// back-filled with the refund id and both actions are linked. Its
    /// status is only moved to FAILED while it is still PENDING.
    pub async fn reversal(
        &self,
        instruction: ReversalInstruction,
    ) -> Result<Settlement, LedgerError> {
        let resolved = self.resolver().resolve_account(instruction.account_id).await?;
        resolved.ensure_postable()?;

        let original = self
            .adapter
            .get_transaction(instruction.original)
            .await?
            .filter(|t| t.account_id == resolved.account.id && t.kind == TransactionType::Debit)
            .ok_or(LedgerError::NoOriginalTransaction)?;
        let reference = original
            .reference
            .clone()
            .ok_or(LedgerError::NoOriginalTransaction)?;

        ensure_not_returned(self.adapter(), &resolved.account, &reference).await?;

        if instruction.amount.minor() > original.amount {
            info!(
                original = %original.id,
                requested = instruction.amount.minor(),
                settled = original.amount,
                "reversal exceeds original amount"
            );
            return Err(LedgerError::InvalidAmount);
        }

        let withdraw = self
            .adapter
            .get_action(original.action_id)
            .await?
            .ok_or(LedgerError::NoOriginalTransaction)?;

        let refund = Action::new(
            resolved.merchant.id,
            ActionType::Refund,
            instruction.amount.credit(),
        )
        .self_referenced(withdraw.reference_type)
        .with_comment(json!({ "failed_transaction": withdraw.id }).to_string())
        .with_bank(instruction.bank_name.clone())
        .with_remote_reference(instruction.rail.rrn.clone())
        .with_partner(PARTNER)
        .linked_to(withdraw.id);
        let refund_id = refund.id;

        let mut annotation = Annotation::on(withdraw.id)
            .reference(refund_id.to_string())
            .failure_reason(self.options.reversal_failure_reason.clone())
            .linked_to(refund_id);
        if withdraw.is_pending() {
            annotation = annotation.status(ActionStatus::Failed);
        }

        let destination = instruction
            .destination_iban
            .unwrap_or_else(|| resolved.account.iban.clone());
        let transaction = Transaction::for_action(
            TransactionType::Reversal,
            resolved.account.id,
            &refund,
            instruction.amount.minor(),
            destination,
            instruction.bank_name,
        )
        .from_iban(Some(original.to_iban.clone()))
        .reference(reference)
        .rail_ids(instruction.rail);

        let mut plan = ExecutionPlan::new();
        plan.post(
            refund,
            Gate::Credit {
                account_id: resolved.account.id,
            },
        )
        .annotate(annotation)
        .record(transaction);

        let receipt = self.commit("reversal", plan, instruction.amount).await?;
        let settlement = Settlement::from_receipt(&receipt, refund_id)?;

        info!(
            original = %original.id,
            refund = %refund_id,
            account = %resolved.account.iban,
            amount = instruction.amount.minor(),
            "reversal settled"
        );
        Ok(settlement)
    }

    /// Recompute a merchant's balance from its action log.
    ///
    /// Every posted action moved the balance when it was written, so the
    /// ledger balance is the sum of all deltas; a FAILED withdraw is
    /// offset by its own REFUND.
    pub async fn reconcile(&self, merchant_id: MerchantId) -> Result<Reconciliation, LedgerError> {
        let merchant: Merchant = self
            .adapter
            .get_merchant(merchant_id)
            .await?
            .ok_or_else(|| LedgerError::Storage(format!("merchant {merchant_id} missing")))?;
        let actions = self.adapter.actions_for_merchant(merchant_id).await?;

        let report = Reconciliation {
            merchant_id,
            cached_balance: merchant.current_balance,
            ledger_balance: actions.iter().map(|a| a.delta).sum(),
            actions: actions.len(),
        };

        if report.is_consistent() {
            debug!(merchant = %merchant_id, balance = report.cached_balance, "balance reconciled");
        } else {
            warn!(
                merchant = %merchant_id,
                cached = report.cached_balance,
                ledger = report.ledger_balance,
                drift = report.drift(),
                "balance drift detected"
            );
        }
        Ok(report)
    }

    fn spawn_deposit_notification(&self, notification: DepositNotification) {
        let notifier = Arc::clone(&self.notifier);
        let timeout = self.options.notify_timeout;

        tokio::spawn(async move {
            let deposit_key = notification.deposit_key.clone();
            match tokio::time::timeout(timeout, notifier.deposit(notification)).await {
                Ok(Ok(())) => debug!(%deposit_key, "deposit notification sent"),
                Ok(Err(err)) => {
                    counter!("ledger.notify.failures.total").increment(1);
                    warn!(%deposit_key, error = %err, "deposit notification failed");
                }
                Err(_) => {
                    counter!("ledger.notify.failures.total").increment(1);
                    warn!(%deposit_key, ?timeout, "deposit notification timed out");
                }
            }
        });
    }
}
