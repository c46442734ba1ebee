// src/codes.rs
use ledger::LedgerError;
use serde::{Serialize, Serializer};

/// Rail response codes. Every settlement response carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    ProcessedOk,
    IncorrectAccountNumber,
    BlockedAccount,
    LimitOut,
    AccountInactive,
    InvalidAmount,
    AlreadyReturned,
    DuplicatePayment,
    NoOriginalTransaction,
    BankNotFound,
    TechnicalProblem,
}

impl ResponseCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProcessedOk => "000",
            Self::IncorrectAccountNumber => "001",
            Self::BlockedAccount => "004",
            Self::LimitOut => "007",
            Self::AccountInactive => "008",
            Self::InvalidAmount => "010",
            Self::AlreadyReturned => "011",
            Self::DuplicatePayment => "012",
            Self::NoOriginalTransaction => "015",
            Self::BankNotFound => "020",
            Self::TechnicalProblem => "021",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ProcessedOk => "Success",
            Self::IncorrectAccountNumber => "Account number is invalid or missing.",
            Self::BlockedAccount => {
                "Account specified is blocked prohibiting posting of transactions against it"
            }
            Self::LimitOut => "Specific transaction/message amount is greater than allowed maximum",
            Self::AccountInactive => "Account Inactive",
            Self::InvalidAmount => "Amount is invalid or missing",
            Self::AlreadyReturned => "Already returned original SCT",
            Self::DuplicatePayment => "Payment is a duplicate of another payment",
            Self::NoOriginalTransaction => "Original credit transfer never received",
            Self::BankNotFound => "Bank not found",
            Self::TechnicalProblem => {
                "Cancellation requested following technical problems resulting in an erroneous transaction"
            }
        }
    }

    /// Response code for a ledger failure. `None` for errors that are not
    /// answered with a code at all (a busy principal).
    pub fn for_error(err: &LedgerError) -> Option<Self> {
        let code = match err {
            LedgerError::InvalidAmount => Self::InvalidAmount,
            LedgerError::DuplicatePayment(_) => Self::DuplicatePayment,
            LedgerError::AccountNotFound(_) => Self::IncorrectAccountNumber,
            LedgerError::AccountInactive => Self::AccountInactive,
            LedgerError::BlockedAccount => Self::BlockedAccount,
            LedgerError::LimitExceeded => Self::LimitOut,
            LedgerError::BankNotFound(_) => Self::BankNotFound,
            LedgerError::NoOriginalTransaction => Self::NoOriginalTransaction,
            LedgerError::AlreadyReturned => Self::AlreadyReturned,
            LedgerError::Busy(_) => return None,
            // Everything else has no rail code of its own.
            _ => Self::TechnicalProblem,
        };
        Some(code)
    }
}

impl Serialize for ResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}
