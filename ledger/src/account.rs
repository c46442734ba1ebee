// ledger/src/account.rs
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CustomerId, LedgerError};

pub type AccountId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Unavailable,
    Available,
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Available => "available",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unavailable" => Ok(Self::Unavailable),
            "available" => Ok(Self::Available),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(LedgerError::Storage(format!("unknown account status {other}"))),
        }
    }
}

/// A rail account. `iban` is unique across the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub customer_id: CustomerId,
    pub iban: String,
    pub title: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// New accounts start `available` and must be activated before posting.
    pub fn new(customer_id: CustomerId, iban: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            customer_id,
            iban: normalize_iban(&iban.into()),
            title: title.into(),
            status: AccountStatus::Available,
            created_at: Utc::now(),
        }
    }

    pub fn activated(mut self) -> Self {
        self.status = AccountStatus::Active;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// IBANs arrive with stray whitespace and mixed case from some banks.
pub fn normalize_iban(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_iban() {
        assert_eq!(
            normalize_iban(" pk36 scbl 0000 0011 2345 6702 "),
            "PK36SCBL0000001123456702"
        );
    }

    #[test]
    fn test_new_account_is_not_active() {
        let account = Account::new(Uuid::now_v7(), "PK36SCBL0000001123456702", "Ali Traders");
        assert_eq!(account.status, AccountStatus::Available);
        assert!(account.activated().is_active());
    }
}
