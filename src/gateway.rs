// src/gateway.rs
//! Rail-facing settlement operations.
//!
//! Each operation runs its checks in the order the rail expects, so the
//! first failing check decides the response code. Balance-affecting work
//! runs inside the principal's lock; the ledger re-checks every gate inside
//! its own unit of work, so a check here can only fail early, never let a
//! posting through.
use std::sync::Arc;

use ledger::compensation::ensure_not_returned;
use ledger::{
    Amount, CreditInstruction, Ledger, LedgerError, Resolved, ReversalInstruction, Route,
    Serializer, WithdrawInstruction, WithdrawOutcome, WithdrawResult,
};
use metrics::counter;
use serde_json::Value;
use tracing::{error, info};

use crate::codes::ResponseCode;
use crate::collaborators::{BankDirectory, FlatLimit, LimitChecker, StaticBankDirectory};
use crate::request::{
    CreditRequest, ReversalRequest, SettlementResponse, TitleFetchRequest, WithdrawRequest,
    WithdrawResultRequest,
};

pub const CREDIT_PATH: &str = "/raast/credit/";
pub const REVERSAL_PATH: &str = "/raast/reversal/";
pub const WITHDRAW_PATH: &str = "/raast/withdraw/";
pub const WITHDRAW_RESULT_PATH: &str = "/raast/withdraw-result/";

#[derive(Clone)]
pub struct Gateway {
    ledger: Ledger,
    serializer: Serializer,
    limits: Arc<dyn LimitChecker>,
    banks: Arc<dyn BankDirectory>,
    reversal_bank_name: String,
}

impl Gateway {
    pub fn new(ledger: Ledger, serializer: Serializer) -> Self {
        Self {
            ledger,
            serializer,
            limits: Arc::new(FlatLimit::unlimited()),
            banks: Arc::new(StaticBankDirectory::new()),
            reversal_bank_name: "ucash".to_string(),
        }
    }

    pub fn with_limits(mut self, limits: Arc<dyn LimitChecker>) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_banks(mut self, banks: Arc<dyn BankDirectory>) -> Self {
        self.banks = banks;
        self
    }

    pub fn with_reversal_bank_name(mut self, name: impl Into<String>) -> Self {
        self.reversal_bank_name = name.into();
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn credit(&self, request: CreditRequest) -> SettlementResponse {
        let result = self.try_credit(&request).await;
        respond("credit", request.rrn.as_deref(), result)
    }

    pub async fn reversal(&self, request: ReversalRequest) -> SettlementResponse {
        let result = self.try_reversal(&request).await;
        respond("reversal", request.rrn.as_deref(), result)
    }

    pub async fn title_fetch(&self, request: TitleFetchRequest) -> SettlementResponse {
        let result = self
            .resolve(request.to_account_number.as_deref())
            .await
            .map(|resolved| {
                let mut response = SettlementResponse::ok();
                response.account_title = Some(resolved.account.title);
                response.beneficiary_iban = Some(resolved.account.iban);
                response
            });
        respond("title_fetch", None, result)
    }

    pub async fn withdraw(&self, request: WithdrawRequest) -> SettlementResponse {
        let result = self.try_withdraw(&request).await;
        respond("withdraw", None, result)
    }

    pub async fn withdraw_result(&self, request: WithdrawResultRequest) -> SettlementResponse {
        let result = self.try_withdraw_result(&request).await;
        respond("withdraw_result", request.rrn.as_deref(), result)
    }

    async fn try_credit(&self, request: &CreditRequest) -> Result<SettlementResponse, LedgerError> {
        let minor = parse_integer(request.transaction_amount.as_ref())?;
        self.ledger
            .guard()
            .ensure_fresh(request.rrn.as_deref().unwrap_or_default())
            .await?;
        let amount = Amount::new(minor)?;
        let resolved = self.resolve(request.to_account_number.as_deref()).await?;

        let route = Route::new(CREDIT_PATH, "POST");
        self.serializer
            .run(&route, resolved.principal(), || async {
                let available = self
                    .limits
                    .available_credit_limit(resolved.principal())
                    .await?;
                if amount.minor() > available {
                    info!(
                        principal = resolved.principal(),
                        amount = amount.minor(),
                        available,
                        "credit over limit"
                    );
                    return Err(LedgerError::LimitExceeded);
                }

                resolved.ensure_postable()?;

                let imd = request.from_bank_imd.as_deref().unwrap_or_default();
                let bank_name = self
                    .banks
                    .bank_name(imd)
                    .await?
                    .ok_or_else(|| LedgerError::BankNotFound(imd.to_string()))?;

                let comment = serde_json::to_string(request)
                    .map_err(|e| LedgerError::Storage(e.to_string()))?;

                let settlement = self
                    .ledger
                    .credit(CreditInstruction {
                        amount,
                        account_id: resolved.account.id,
                        from_iban: request.from_account_number.clone(),
                        bank_name,
                        rail: request.rail_ids(),
                        sender_name: request.sender_name.clone(),
                        comment: Some(comment),
                    })
                    .await?;

                Ok(SettlementResponse::ok().with_transaction_log_id(settlement.transaction.id))
            })
            .await
    }

    async fn try_reversal(
        &self,
        request: &ReversalRequest,
    ) -> Result<SettlementResponse, LedgerError> {
        let minor = parse_integer(request.transaction_amount.as_ref())?;
        self.ledger
            .guard()
            .ensure_fresh(request.rrn.as_deref().unwrap_or_default())
            .await?;
        let amount = Amount::new(minor)?;
        let resolved = self.resolve(request.account_number.as_deref()).await?;

        let route = Route::new(REVERSAL_PATH, "POST");
        self.serializer
            .run(&route, resolved.principal(), || async {
                resolved.ensure_postable()?;

                let msgid = request
                    .msgid
                    .as_deref()
                    .filter(|m| !m.trim().is_empty())
                    .ok_or(LedgerError::NoOriginalTransaction)?;
                let original = self
                    .ledger
                    .adapter()
                    .find_by_payment_identifier(resolved.account.id, msgid)
                    .await?
                    .ok_or(LedgerError::NoOriginalTransaction)?;
                let reference = original
                    .reference
                    .as_deref()
                    .ok_or(LedgerError::NoOriginalTransaction)?;
                ensure_not_returned(self.ledger.adapter(), &resolved.account, reference).await?;

                let settlement = self
                    .ledger
                    .reversal(ReversalInstruction {
                        amount,
                        account_id: resolved.account.id,
                        original: original.id,
                        bank_name: self.reversal_bank_name.clone(),
                        rail: request.rail_ids(),
                        destination_iban: request.account_number.clone(),
                    })
                    .await?;

                Ok(SettlementResponse::ok().with_transaction_log_id(settlement.transaction.id))
            })
            .await
    }

    async fn try_withdraw(&self, request: &WithdrawRequest) -> Result<SettlementResponse, LedgerError> {
        let amount = Amount::new(parse_integer(request.transaction_amount.as_ref())?)?;
        let resolved = self.resolve(request.account_number.as_deref()).await?;
        let destination_iban = request
            .to_account_number
            .clone()
            .filter(|iban| !iban.trim().is_empty())
            .ok_or(LedgerError::MissingField("toAccountNumber"))?;

        let route = Route::new(WITHDRAW_PATH, "POST");
        self.serializer
            .run(&route, resolved.principal(), || async {
                let withdraw = self
                    .ledger
                    .withdraw(WithdrawInstruction {
                        amount,
                        account_id: resolved.account.id,
                        destination_iban,
                        bank_name: request.bank_name.clone().unwrap_or_default(),
                    })
                    .await?;

                let mut response = SettlementResponse::ok();
                response.withdraw_id = Some(withdraw.id.to_string());
                response.status = Some(withdraw.status.as_str().to_string());
                Ok(response)
            })
            .await
    }

    async fn try_withdraw_result(
        &self,
        request: &WithdrawResultRequest,
    ) -> Result<SettlementResponse, LedgerError> {
        let withdraw_id = request
            .withdraw_id
            .ok_or(LedgerError::MissingField("withdrawId"))?;
        let success = request
            .success
            .ok_or(LedgerError::MissingField("success"))?;
        let amount = Amount::new(parse_integer(request.transaction_amount.as_ref())?)?;
        let resolved = self.resolve(request.account_number.as_deref()).await?;

        let route = Route::new(WITHDRAW_RESULT_PATH, "POST");
        self.serializer
            .run(&route, resolved.principal(), || async {
                let outcome = self
                    .ledger
                    .process_withdraw(WithdrawResult {
                        withdraw_id,
                        account_id: resolved.account.id,
                        amount,
                        destination_iban: request.to_account_number.clone().unwrap_or_default(),
                        bank_name: request
                            .bank_name
                            .clone()
                            .unwrap_or_else(|| self.reversal_bank_name.clone()),
                        success,
                        failure_reason: request.failure_reason.clone(),
                        rail: request.rail_ids(),
                    })
                    .await?;

                let response = match outcome {
                    WithdrawOutcome::Completed(settlement) => {
                        let mut response = SettlementResponse::ok()
                            .with_transaction_log_id(settlement.transaction.id);
                        response.status = Some("COMPLETED".to_string());
                        response
                    }
                    WithdrawOutcome::Failed { refund } => {
                        let mut response = SettlementResponse::ok()
                            .with_transaction_log_id(refund.transaction.id);
                        response.status = Some("FAILED".to_string());
                        response.refund_reference = Some(refund.action.id.to_string());
                        response
                    }
                };
                Ok(response)
            })
            .await
    }

    async fn resolve(&self, iban: Option<&str>) -> Result<Resolved, LedgerError> {
        self.ledger.resolver().resolve(iban.unwrap_or_default()).await
    }
}

fn parse_integer(raw: Option<&Value>) -> Result<i64, LedgerError> {
    Amount::parse_integer(raw.ok_or(LedgerError::InvalidAmount)?)
}

/// Turn an operation result into the rail response and record it.
fn respond(
    op: &'static str,
    rrn: Option<&str>,
    result: Result<SettlementResponse, LedgerError>,
) -> SettlementResponse {
    let response = match result {
        Ok(response) => response,
        Err(err) => match ResponseCode::for_error(&err) {
            None => SettlementResponse::busy(),
            Some(code) => {
                if err.is_technical() {
                    error!(op, rrn = rrn.unwrap_or_default(), error = %err, "settlement failed");
                } else {
                    info!(
                        op,
                        rrn = rrn.unwrap_or_default(),
                        code = code.code(),
                        reason = %err,
                        "settlement rejected"
                    );
                }
                SettlementResponse::rejected(code)
            }
        },
    };

    counter!("raast.gateway.responses.total",
        "op" => op,
        "code" => response.code().unwrap_or("busy")
    )
    .increment(1);
    response
}
