// ledger/src/plan.rs
use crate::{
    Account, AccountId, Action, ActionId, ActionStatus, LedgerError, Merchant, MerchantId,
    Transaction,
};

/// Pre-condition re-checked by the adapter under the merchant row lock
/// before a posting is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// No status check; used by compensation, which must always be able
    /// to hand money back.
    Open,
    /// Merchant ACTIVE and not credit-blocked, account ACTIVE.
    Credit { account_id: AccountId },
    /// Resulting balance must stay at or above `Merchant::MIN_BALANCE`.
    Funds,
}

impl Gate {
    /// `account` must be the row named by `Gate::Credit`, read inside the
    /// same unit of work. `balance` is the merchant balance after posting.
    pub fn check(
        &self,
        merchant: &Merchant,
        account: Option<&Account>,
        balance: i64,
    ) -> Result<(), LedgerError> {
        match self {
            Gate::Open => Ok(()),
            Gate::Credit { account_id } => {
                let account =
                    account.ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
                if !merchant.is_active() || !account.is_active() {
                    return Err(LedgerError::AccountInactive);
                }
                if merchant.credit_blocked {
                    return Err(LedgerError::BlockedAccount);
                }
                Ok(())
            }
            Gate::Funds => {
                if balance < Merchant::MIN_BALANCE {
                    return Err(LedgerError::InsufficientFunds);
                }
                Ok(())
            }
        }
    }
}

/// Narrow back-fill allowed on an existing action.
#[derive(Debug, Clone, Default)]
pub struct Annotation {
    pub action_id: ActionId,
    pub status: Option<ActionStatus>,
    pub reference: Option<String>,
    pub failure_reason: Option<String>,
    pub linked_action: Option<ActionId>,
}

impl Annotation {
    pub fn on(action_id: ActionId) -> Self {
        Self {
            action_id,
            ..Default::default()
        }
    }

    pub fn status(mut self, status: ActionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn linked_to(mut self, other: ActionId) -> Self {
        self.linked_action = Some(other);
        self
    }

    /// Apply to the stored row. A status change must follow the lifecycle.
    pub fn apply_to(&self, action: &mut Action) -> Result<(), LedgerError> {
        if let Some(status) = self.status {
            action.check_transition(status)?;
            action.status = status;
        }
        if let Some(reference) = &self.reference {
            action.reference = reference.clone();
        }
        if let Some(reason) = &self.failure_reason {
            action.failure_reason = Some(reason.clone());
        }
        if let Some(linked) = self.linked_action {
            action.linked_action = Some(linked);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Operation {
    /// Append `action` and move its merchant's balance by `action.delta`.
    Post { action: Action, gate: Gate },
    Annotate(Annotation),
    /// Append the settlement record owned by an action.
    Record { transaction: Transaction },
}

/// Ordered operations forming one unit of work. Nothing is written until
/// an adapter executes the whole plan.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    operations: Vec<Operation>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, op: Operation) -> &mut Self {
        self.operations.push(op);
        self
    }

    pub fn post(&mut self, action: Action, gate: Gate) -> &mut Self {
        self.add(Operation::Post { action, gate })
    }

    pub fn annotate(&mut self, annotation: Annotation) -> &mut Self {
        self.add(Operation::Annotate(annotation))
    }

    pub fn record(&mut self, transaction: Transaction) -> &mut Self {
        self.add(Operation::Record { transaction })
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Merchant rows to lock, sorted so concurrent plans always lock in the
    /// same order.
    pub fn calculate_locks(&self) -> Vec<MerchantId> {
        let mut locks: Vec<MerchantId> = self
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Post { action, .. } => Some(action.merchant_id),
                _ => None,
            })
            .collect();
        locks.sort();
        locks.dedup();
        locks
    }
}

/// What a committed plan wrote, in plan order.
#[derive(Debug, Clone, Default)]
pub struct Receipt {
    pub posted: Vec<Action>,
    /// Pre-existing actions changed by annotations, in their final state.
    pub annotated: Vec<Action>,
    pub recorded: Vec<Transaction>,
}

impl Receipt {
    /// Final state of an action the plan posted or annotated.
    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.posted
            .iter()
            .chain(self.annotated.iter())
            .find(|a| a.id == id)
    }

    pub fn recorded_for(&self, action_id: ActionId) -> Option<&Transaction> {
        self.recorded.iter().find(|t| t.action_id == action_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActionType;
    use uuid::Uuid;

    #[test]
    fn test_locks_are_sorted_and_unique() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        let mut plan = ExecutionPlan::new();
        plan.post(Action::new(b, ActionType::Deposited, 10), Gate::Open)
            .post(Action::new(a, ActionType::Fee, -1), Gate::Funds)
            .post(Action::new(b, ActionType::Commission, 2), Gate::Open)
            .annotate(Annotation::on(Uuid::now_v7()).status(ActionStatus::Failed));

        assert_eq!(plan.calculate_locks(), vec![a, b]);
        assert_eq!(plan.operations().len(), 4);
    }
}
