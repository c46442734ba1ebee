// ledger/src/transaction.rs
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AccountId, Action, ActionId, LedgerError};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Credit,
    Debit,
    Reversal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
            Self::Reversal => "REVERSAL",
        }
    }

    /// Types whose rrn must be unique.
    pub fn is_rrn_unique(&self) -> bool {
        matches!(self, Self::Credit | Self::Debit)
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT" => Ok(Self::Credit),
            "DEBIT" => Ok(Self::Debit),
            "REVERSAL" => Ok(Self::Reversal),
            other => Err(LedgerError::Storage(format!(
                "unknown transaction type {other}"
            ))),
        }
    }
}

/// Rail settlement record, one-to-one with its owning [`Action`].
/// Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub action_id: ActionId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: i64,
    pub from_iban: Option<String>,
    pub to_iban: String,
    pub bank_name: String,
    pub reference: Option<String>,
    pub rrn: Option<String>,
    pub stan: Option<String>,
    pub transmission_date_time: Option<String>,
    pub payment_identifier: Option<String>,
    pub transaction_identifier: Option<String>,
    pub sender_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Rail correlation ids carried on a settlement message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RailIds {
    pub rrn: Option<String>,
    pub stan: Option<String>,
    pub transmission_date_time: Option<String>,
    pub payment_identifier: Option<String>,
    pub transaction_identifier: Option<String>,
}

impl Transaction {
    /// Build a record for `action`, stamped with the action's creation time.
    pub fn for_action(
        kind: TransactionType,
        account_id: AccountId,
        action: &Action,
        amount: i64,
        to_iban: impl Into<String>,
        bank_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            account_id,
            action_id: action.id,
            kind,
            amount,
            from_iban: None,
            to_iban: to_iban.into(),
            bank_name: bank_name.into(),
            reference: None,
            rrn: None,
            stan: None,
            transmission_date_time: None,
            payment_identifier: None,
            transaction_identifier: None,
            sender_name: None,
            created_at: action.created_at,
        }
    }

    pub fn from_iban(mut self, iban: Option<String>) -> Self {
        self.from_iban = iban;
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn sender(mut self, sender_name: Option<String>) -> Self {
        self.sender_name = sender_name;
        self
    }

    pub fn rail_ids(mut self, ids: RailIds) -> Self {
        self.rrn = ids.rrn;
        self.stan = ids.stan;
        self.transmission_date_time = ids.transmission_date_time;
        self.payment_identifier = ids.payment_identifier;
        self.transaction_identifier = ids.transaction_identifier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActionType;

    #[test]
    fn test_record_inherits_action_time() {
        let action = Action::new(Uuid::now_v7(), ActionType::Deposited, 5000);
        let tx = Transaction::for_action(
            TransactionType::Credit,
            Uuid::now_v7(),
            &action,
            5000,
            "PK36SCBL0000001123456702",
            "HBL",
        )
        .rail_ids(RailIds {
            rrn: Some("000000000001".into()),
            ..Default::default()
        });

        assert_eq!(tx.action_id, action.id);
        assert_eq!(tx.created_at, action.created_at);
        assert_eq!(tx.rrn.as_deref(), Some("000000000001"));
        assert!(tx.kind.is_rrn_unique());
        assert!(!TransactionType::Reversal.is_rrn_unique());
    }
}
