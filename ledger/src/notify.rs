// ledger/src/notify.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Action, LedgerError, Merchant, Transaction};

/// Deposit notice handed to the external notification sink after a credit
/// commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositNotification {
    pub phone_number: String,
    pub amount: i64,
    /// Last four characters of the sender's IBAN.
    pub account_number: String,
    pub account_title: Option<String>,
    pub account_bank: String,
    pub secret_key: String,
    pub deposit_key: String,
    pub reference_id: String,
    pub status: String,
    pub message: String,
    pub remote_reference_id: Option<String>,
    pub service: String,
    pub recon: bool,
}

impl DepositNotification {
    pub fn for_credit(merchant: &Merchant, action: &Action, transaction: &Transaction) -> Self {
        let sender_iban = transaction.from_iban.as_deref().unwrap_or_default();
        let tail_start = sender_iban
            .char_indices()
            .rev()
            .nth(3)
            .map(|(i, _)| i)
            .unwrap_or(0);

        Self {
            phone_number: merchant.username.clone(),
            amount: transaction.amount,
            account_number: sender_iban[tail_start..].to_string(),
            account_title: transaction.sender_name.clone(),
            account_bank: transaction.bank_name.clone(),
            secret_key: merchant.secret_key.clone(),
            deposit_key: action.id.to_string(),
            reference_id: action.reference.clone(),
            status: "COMPLETED".to_string(),
            message: "COMPLETED".to_string(),
            remote_reference_id: transaction.rrn.clone(),
            service: "raast".to_string(),
            recon: true,
        }
    }
}

/// Fire-and-forget sink. Errors are reported to the caller, which logs
/// them; they never unwind a committed posting.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deposit(&self, notification: DepositNotification) -> Result<(), LedgerError>;
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn deposit(&self, _notification: DepositNotification) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Writes each notice to the log as JSON. Stands in for the sink in the
/// replay binary.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deposit(&self, notification: DepositNotification) -> Result<(), LedgerError> {
        let payload = serde_json::to_string(&notification)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        info!(target: "raast::notify", %payload, "deposit notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionType, ReferenceType, TransactionType};
    use uuid::Uuid;

    #[test]
    fn test_payload_fields() {
        let merchant = Merchant::new("03001234567");
        let action = Action::new(merchant.id, ActionType::Deposited, 5000)
            .self_referenced(ReferenceType::BankTransfer);
        let tx = Transaction::for_action(
            TransactionType::Credit,
            Uuid::now_v7(),
            &action,
            5000,
            "PK36SCBL0000001123456702",
            "HBL",
        )
        .from_iban(Some("PK12HABB0000009876543210".into()))
        .sender(Some("Sara".into()));

        let notice = DepositNotification::for_credit(&merchant, &action, &tx);
        assert_eq!(notice.account_number, "3210");
        assert_eq!(notice.phone_number, "03001234567");
        assert_eq!(notice.deposit_key, action.id.to_string());
        assert_eq!(notice.reference_id, action.reference);
        assert_eq!(notice.service, "raast");
        assert!(notice.recon);
    }

    #[test]
    fn test_short_sender_iban() {
        let merchant = Merchant::new("03001234567");
        let action = Action::new(merchant.id, ActionType::Deposited, 1);
        let tx = Transaction::for_action(TransactionType::Credit, Uuid::now_v7(), &action, 1, "X", "HBL")
            .from_iban(Some("PK1".into()));
        assert_eq!(DepositNotification::for_credit(&merchant, &action, &tx).account_number, "PK1");
    }
}
