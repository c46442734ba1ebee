// ledger/src/merchant.rs
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::LedgerError;

pub type MerchantId = Uuid;
pub type CustomerId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MerchantStatus {
    Active,
    Inactive,
    OnHold,
}

impl MerchantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::OnHold => "ON_HOLD",
        }
    }
}

impl FromStr for MerchantStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "ON_HOLD" => Ok(Self::OnHold),
            other => Err(LedgerError::Storage(format!("unknown merchant status {other}"))),
        }
    }
}

/// A wallet holder. `current_balance` is a cache over the action log and is
/// only ever written by the ledger engine inside a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: MerchantId,
    /// Login name of the owning user; the phone number for wallet users.
    pub username: String,
    pub current_balance: i64,
    pub status: MerchantStatus,
    pub credit_blocked: bool,
    pub secret_key: String,
    pub created_at: DateTime<Utc>,
}

impl Merchant {
    /// Balance may never be driven below this by a debit.
    pub const MIN_BALANCE: i64 = 0;

    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            username: username.into(),
            current_balance: 0,
            status: MerchantStatus::Active,
            credit_blocked: false,
            secret_key: Uuid::new_v4().simple().to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MerchantStatus::Active
    }
}

/// The rail-side identity of a merchant (at most one per merchant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub merchant_id: MerchantId,
    pub record_id: String,
    pub cnic: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(
        merchant_id: MerchantId,
        record_id: impl Into<String>,
        cnic: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            merchant_id,
            record_id: record_id.into(),
            cnic: cnic.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}
