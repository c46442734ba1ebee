// ledger/src/compensation.rs
//! Undo of a pending withdraw whose upstream settlement failed.
use serde_json::json;

use crate::{
    Account, Action, ActionStatus, ActionType, Annotation, ExecutionPlan, Gate, LedgerAdapter,
    LedgerError, RailIds, Transaction, TransactionType,
};

/// Destination IBAN recorded on a withdraw when it was initiated.
pub fn withdraw_destination(withdraw: &Action) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(&withdraw.comment)
        .ok()?
        .get("to_iban")?
        .as_str()
        .map(str::to_string)
}

/// The three writes that undo a withdraw: the refund posting, the FAILED
/// annotation on the withdraw and the REVERSAL record.
#[derive(Debug, Clone)]
pub struct Compensation {
    pub refund: Action,
    pub annotation: Annotation,
    pub reversal: Transaction,
}

impl Compensation {
    pub fn for_withdraw(
        withdraw: &Action,
        account: &Account,
        failure_reason: &str,
        bank_name: &str,
        rail: RailIds,
    ) -> Result<Self, LedgerError> {
        if !withdraw.kind.is_withdrawal() {
            return Err(LedgerError::WithdrawNotFound(withdraw.id));
        }
        if withdraw
            .check_transition(ActionStatus::Failed)
            .is_err()
        {
            return Err(LedgerError::WithdrawNotPending(withdraw.id));
        }

        let magnitude = withdraw.magnitude();
        let refund = Action::new(withdraw.merchant_id, ActionType::Refund, magnitude)
            .self_referenced(withdraw.reference_type)
            .with_comment(json!({ "failed_transaction": withdraw.id }).to_string())
            .with_bank(bank_name)
            .with_remote_reference(rail.rrn.clone())
            .with_partner("raast")
            .linked_to(withdraw.id);

        let annotation = Annotation::on(withdraw.id)
            .status(ActionStatus::Failed)
            .failure_reason(failure_reason)
            .reference(refund.id.to_string())
            .linked_to(refund.id);

        // Keyed on the withdraw's settlement reference, the same key a rail
        // reversal of this withdraw would use.
        let reversal = Transaction::for_action(
            TransactionType::Reversal,
            account.id,
            &refund,
            magnitude,
            &account.iban,
            bank_name,
        )
        .from_iban(withdraw_destination(withdraw))
        .reference(withdraw.reference.clone())
        .rail_ids(rail);

        Ok(Self {
            refund,
            annotation,
            reversal,
        })
    }

    /// Refund first so the withdraw's link target exists when annotated.
    pub fn into_plan(self) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new();
        plan.post(self.refund, Gate::Open)
            .annotate(self.annotation)
            .record(self.reversal);
        plan
    }
}

/// `AlreadyReturned` when a REVERSAL already carries `reference` on this
/// account.
pub async fn ensure_not_returned(
    adapter: &dyn LedgerAdapter,
    account: &Account,
    reference: &str,
) -> Result<(), LedgerError> {
    if adapter.reversal_exists(account.id, reference).await? {
        return Err(LedgerError::AlreadyReturned);
    }
    Ok(())
}
