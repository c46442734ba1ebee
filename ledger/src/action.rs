// ledger/src/action.rs
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LedgerError, MerchantId};

pub type ActionId = Uuid;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(LedgerError::Storage(format!(
                        concat!("unknown ", stringify!($name), " {}"),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(ActionType {
    Created => "CREATED",
    Profit => "PROFIT",
    Deposited => "DEPOSITED",
    Recharge => "RECHARGE",
    Commission => "COMMISSION",
    Withdraw => "WITHDRAW",
    CashBack => "CASH_BACK",
    Refund => "REFUND",
    Salary => "SALARY",
    Correction => "CORRECTION",
    Promotion => "PROMOTION",
    BillPayment => "BILL_PAYMENT",
    Fee => "FEE",
    Transfer => "TRANSFER",
    Payment => "PAYMENT",
    RetailerDeposit => "RETAILER_DEPOSIT",
    RetailerWithdraw => "RETAILER_WITHDRAW",
    Loan => "LOAN",
    LoanDisburse => "LOAN_DISBURSE",
    LoanRepayment => "LOAN_REPAYMENT",
    BookTicket => "BOOK_TICKET",
    CancelTicket => "CANCEL_TICKET",
    VoucherPayment => "VOUCHER_PAYMENT",
    SmsBundlePayment => "SMS_BUNDLE_PAYMENT",
});

impl ActionType {
    /// Types that move money out of the wallet to an outside party.
    pub fn is_withdrawal(&self) -> bool {
        matches!(self, Self::Withdraw | Self::Salary | Self::Transfer)
    }
}

text_enum!(ActionStatus {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

impl ActionStatus {
    /// PENDING is the only non-terminal status.
    pub fn can_transition_to(&self, target: ActionStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Completed) | (Self::Pending, Self::Failed)
        )
    }
}

text_enum!(ReferenceType {
    BankTransfer => "BANK_TRANSFER",
    Check => "CHECK",
    Cash => "CASH",
    None => "NONE",
});

/// Upper bound of the balance snapshot column.
pub const DEBUG_BALANCE_CAP: i64 = i32::MAX as i64;

/// Clamp a balance into the 32-bit snapshot column.
pub fn cap_debug_balance(balance: i64) -> i32 {
    balance.clamp(i32::MIN as i64, DEBUG_BALANCE_CAP) as i32
}

/// 22-character URL-safe id derived from a random UUID. Never begins with
/// `-` or `=` so exported sheets cannot read it as a formula.
pub fn generate_user_friendly_id() -> String {
    loop {
        let raw = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
        let trimmed = raw.trim_start_matches(['-', '=']);
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
}

/// One append-only ledger entry. After creation only `status`,
/// `reference`, `failure_reason` and `linked_action` may change, and only
/// through an annotation in a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub user_friendly_id: String,
    pub merchant_id: MerchantId,
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub status: ActionStatus,
    pub delta: i64,
    /// Merchant balance right after this action was posted, capped to 32 bits.
    pub debug_balance: i32,
    pub reference: String,
    pub reference_type: ReferenceType,
    pub comment: String,
    pub failure_reason: Option<String>,
    pub bank_name: Option<String>,
    pub remote_reference_id: Option<String>,
    pub partner: Option<String>,
    /// Refund ↔ withdraw cross-link; set on both sides by compensation.
    pub linked_action: Option<ActionId>,
    pub created_at: DateTime<Utc>,
}

impl Action {
    pub fn new(merchant_id: MerchantId, kind: ActionType, delta: i64) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_friendly_id: generate_user_friendly_id(),
            merchant_id,
            kind,
            status: ActionStatus::Completed,
            delta,
            debug_balance: 0,
            reference: String::new(),
            reference_type: ReferenceType::None,
            comment: String::new(),
            failure_reason: None,
            bank_name: None,
            remote_reference_id: None,
            partner: None,
            linked_action: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.status = status;
        self
    }

    /// Use the action's own id as its settlement reference.
    pub fn self_referenced(mut self, kind: ReferenceType) -> Self {
        self.reference = self.id.to_string();
        self.reference_type = kind;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_bank(mut self, bank_name: impl Into<String>) -> Self {
        self.bank_name = Some(bank_name.into());
        self
    }

    pub fn with_remote_reference(mut self, rrn: Option<String>) -> Self {
        self.remote_reference_id = rrn;
        self
    }

    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner = Some(partner.into());
        self
    }

    pub fn linked_to(mut self, other: ActionId) -> Self {
        self.linked_action = Some(other);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == ActionStatus::Pending
    }

    /// Check a status change against the one-way lifecycle.
    pub fn check_transition(&self, to: ActionStatus) -> Result<(), LedgerError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            })
        }
    }

    /// Absolute moved amount, in minor units.
    pub fn magnitude(&self) -> i64 {
        self.delta.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_friendly_id_never_starts_with_formula_chars() {
        for _ in 0..5_000 {
            let id = generate_user_friendly_id();
            assert!(!id.is_empty());
            assert!(!id.starts_with('-'));
            assert!(!id.starts_with('='));
            assert!(id.len() <= 22);
        }
    }

    #[test]
    fn test_debug_balance_cap() {
        assert_eq!(cap_debug_balance(5_000), 5_000);
        assert_eq!(cap_debug_balance(i64::MAX), i32::MAX);
        assert_eq!(cap_debug_balance(DEBUG_BALANCE_CAP + 1), i32::MAX);
        assert_eq!(cap_debug_balance(i64::MIN), i32::MIN);
    }

    #[test]
    fn test_status_transitions() {
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::Completed));
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::Failed));
        assert!(!ActionStatus::Completed.can_transition_to(ActionStatus::Failed));
        assert!(!ActionStatus::Failed.can_transition_to(ActionStatus::Completed));
        assert!(!ActionStatus::Pending.can_transition_to(ActionStatus::Pending));
    }

    #[test]
    fn test_self_reference_uses_id() {
        let action = Action::new(Uuid::now_v7(), ActionType::Deposited, 5000)
            .self_referenced(ReferenceType::BankTransfer);
        assert_eq!(action.reference, action.id.to_string());
        assert_eq!(action.reference_type, ReferenceType::BankTransfer);
    }

    #[test]
    fn test_type_text_round_trip() {
        assert_eq!("SMS_BUNDLE_PAYMENT".parse::<ActionType>().unwrap(), ActionType::SmsBundlePayment);
        assert_eq!(ActionType::CashBack.as_str(), "CASH_BACK");
        assert!(ActionType::Salary.is_withdrawal());
        assert!(!ActionType::Refund.is_withdrawal());
        assert!("BOGUS".parse::<ActionType>().is_err());
    }
}
