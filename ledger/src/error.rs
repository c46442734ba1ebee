// ledger/src/error.rs
use thiserror::Error;

use crate::action::{ActionId, ActionStatus};

/// Coarse classification used by callers to decide what a failure means
/// for the rail: whether state was touched, and whether detail may be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    PolicyDenial,
    NotFound,
    Busy,
    Technical,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid amount")]
    InvalidAmount,
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Duplicate payment for rrn {0}")]
    DuplicatePayment(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Account inactive")]
    AccountInactive,
    #[error("Account blocked for credit")]
    BlockedAccount,
    #[error("Amount exceeds available credit limit")]
    LimitExceeded,
    #[error("Bank not found: {0}")]
    BankNotFound(String),
    #[error("Insufficient funds")]
    InsufficientFunds,
    #[error("Original transaction not found")]
    NoOriginalTransaction,
    #[error("Original transaction already returned")]
    AlreadyReturned,
    #[error("Withdraw action not found: {0}")]
    WithdrawNotFound(ActionId),
    #[error("Withdraw action {0} is not pending")]
    WithdrawNotPending(ActionId),
    #[error("Action {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: ActionId,
        from: ActionStatus,
        to: ActionStatus,
    },
    #[error("Principal busy: {0}")]
    Busy(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidAmount | Self::MissingField(_) => ErrorClass::Validation,
            Self::DuplicatePayment(_)
            | Self::AccountInactive
            | Self::BlockedAccount
            | Self::LimitExceeded
            | Self::InsufficientFunds
            | Self::AlreadyReturned
            | Self::WithdrawNotPending(_)
            | Self::InvalidTransition { .. } => ErrorClass::PolicyDenial,
            Self::AccountNotFound(_)
            | Self::BankNotFound(_)
            | Self::NoOriginalTransaction
            | Self::WithdrawNotFound(_) => ErrorClass::NotFound,
            Self::Busy(_) => ErrorClass::Busy,
            Self::Conflict(_) | Self::Storage(_) => ErrorClass::Technical,
        }
    }

    pub fn is_technical(&self) -> bool {
        self.class() == ErrorClass::Technical
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<redis::RedisError> for LedgerError {
    fn from(err: redis::RedisError) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(LedgerError::InvalidAmount.class(), ErrorClass::Validation);
        assert_eq!(
            LedgerError::DuplicatePayment("123".into()).class(),
            ErrorClass::PolicyDenial
        );
        assert_eq!(LedgerError::BlockedAccount.class(), ErrorClass::PolicyDenial);
        assert_eq!(
            LedgerError::NoOriginalTransaction.class(),
            ErrorClass::NotFound
        );
        assert_eq!(LedgerError::Busy("0300".into()).class(), ErrorClass::Busy);
        assert!(LedgerError::Storage("connection reset".into()).is_technical());
    }
}
