// src/request.rs
//! Wire contracts of the settlement endpoints.
use ledger::{ActionId, RailIds};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codes::ResponseCode;

/// Inbound credit transfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRequest {
    pub to_account_number: Option<String>,
    /// Integer minor units; the rail sends either a number or a string.
    pub transaction_amount: Option<Value>,
    pub from_account_number: Option<String>,
    #[serde(rename = "fromBankIMD")]
    pub from_bank_imd: Option<String>,
    pub rrn: Option<String>,
    pub stan: Option<String>,
    pub transmission_date: Option<String>,
    pub transmission_time: Option<String>,
    pub sender_name: Option<String>,
    pub msgid: Option<String>,
}

/// Return of a withdraw by the rail, keyed by the withdraw's message id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalRequest {
    pub account_number: Option<String>,
    pub transaction_amount: Option<Value>,
    pub rrn: Option<String>,
    pub stan: Option<String>,
    pub transmission_date: Option<String>,
    pub transmission_time: Option<String>,
    pub msgid: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleFetchRequest {
    pub to_account_number: Option<String>,
}

/// Outbound transfer initiated by the wallet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub account_number: Option<String>,
    pub transaction_amount: Option<Value>,
    pub to_account_number: Option<String>,
    pub bank_name: Option<String>,
}

/// Upstream outcome of an outbound transfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResultRequest {
    pub withdraw_id: Option<ActionId>,
    pub account_number: Option<String>,
    pub transaction_amount: Option<Value>,
    pub to_account_number: Option<String>,
    pub bank_name: Option<String>,
    /// Required; an absent outcome is never read as a failure.
    pub success: Option<bool>,
    pub failure_reason: Option<String>,
    pub rrn: Option<String>,
    pub stan: Option<String>,
    pub transmission_date: Option<String>,
    pub transmission_time: Option<String>,
    pub msgid: Option<String>,
    pub transaction_identifier: Option<String>,
}

/// `transmissionDate` and `transmissionTime` are stored concatenated.
fn transmission(date: &Option<String>, time: &Option<String>) -> Option<String> {
    match (date, time) {
        (None, None) => None,
        (d, t) => Some(format!(
            "{}{}",
            d.as_deref().unwrap_or_default(),
            t.as_deref().unwrap_or_default()
        )),
    }
}

impl CreditRequest {
    pub fn rail_ids(&self) -> RailIds {
        RailIds {
            rrn: self.rrn.clone(),
            stan: self.stan.clone(),
            transmission_date_time: transmission(&self.transmission_date, &self.transmission_time),
            payment_identifier: self.msgid.clone(),
            transaction_identifier: None,
        }
    }
}

impl ReversalRequest {
    pub fn rail_ids(&self) -> RailIds {
        RailIds {
            rrn: self.rrn.clone(),
            stan: self.stan.clone(),
            transmission_date_time: transmission(&self.transmission_date, &self.transmission_time),
            payment_identifier: None,
            transaction_identifier: None,
        }
    }
}

impl WithdrawResultRequest {
    pub fn rail_ids(&self) -> RailIds {
        RailIds {
            rrn: self.rrn.clone(),
            stan: self.stan.clone(),
            transmission_date_time: transmission(&self.transmission_date, &self.transmission_time),
            payment_identifier: self.msgid.clone(),
            transaction_identifier: self.transaction_identifier.clone(),
        }
    }
}

/// Body of every settlement response. `http_status` travels with the body
/// but is not part of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    #[serde(skip)]
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<ResponseCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_log_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_title: Option<String>,
    #[serde(rename = "beneficiaryIBAN", skip_serializing_if = "Option::is_none")]
    pub beneficiary_iban: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdraw_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SettlementResponse {
    fn empty(http_status: u16) -> Self {
        Self {
            http_status,
            response_code: None,
            response_description: None,
            transaction_log_id: None,
            account_title: None,
            beneficiary_iban: None,
            withdraw_id: None,
            status: None,
            refund_reference: None,
            detail: None,
        }
    }

    pub fn ok() -> Self {
        Self {
            response_code: Some(ResponseCode::ProcessedOk),
            ..Self::empty(200)
        }
    }

    pub fn rejected(code: ResponseCode) -> Self {
        Self {
            response_code: Some(code),
            response_description: Some(code.description().to_string()),
            ..Self::empty(200)
        }
    }

    pub fn busy() -> Self {
        Self {
            detail: Some("Too many requests".to_string()),
            ..Self::empty(429)
        }
    }

    pub fn with_transaction_log_id(mut self, id: impl ToString) -> Self {
        self.transaction_log_id = Some(id.to_string());
        self
    }

    pub fn code(&self) -> Option<&'static str> {
        self.response_code.map(|c| c.code())
    }
}
