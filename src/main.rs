//! Replays JSON-lines settlement envelopes through the gateway.
//!
//! Each input line is `{"op": "...", "body": {...}}`; each output line is
//! the operation name, the HTTP status and the response body.
use std::process::ExitCode;
use std::sync::Arc;

use ledger::{Account, AccountStatus, Customer, LogNotifier, Merchant, MerchantStatus};
use raast::bootstrap;
use raast::{
    CreditRequest, Gateway, GatewayConfig, ReversalRequest, SettlementResponse, TitleFetchRequest,
    WithdrawRequest, WithdrawResultRequest, telemetry,
};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnboardRequest {
    username: String,
    iban: String,
    title: String,
    #[serde(default)]
    cnic: String,
    #[serde(default)]
    record_id: String,
    #[serde(default)]
    credit_blocked: bool,
    #[serde(default)]
    inactive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "snake_case")]
enum Envelope {
    Onboard(OnboardRequest),
    Credit(CreditRequest),
    Reversal(ReversalRequest),
    TitleFetch(TitleFetchRequest),
    Withdraw(WithdrawRequest),
    WithdrawResult(WithdrawResultRequest),
}

impl Envelope {
    fn name(&self) -> &'static str {
        match self {
            Self::Onboard(_) => "onboard",
            Self::Credit(_) => "credit",
            Self::Reversal(_) => "reversal",
            Self::TitleFetch(_) => "title_fetch",
            Self::Withdraw(_) => "withdraw",
            Self::WithdrawResult(_) => "withdraw_result",
        }
    }
}

async fn onboard(gateway: &Gateway, request: OnboardRequest) -> serde_json::Value {
    let adapter = gateway.ledger().adapter();

    let merchant = Merchant::new(request.username);
    let customer = Customer::new(merchant.id, request.record_id, request.cnic, &request.title);
    let account = Account::new(customer.id, request.iban, request.title).activated();

    let result = async {
        adapter.insert_merchant(merchant.clone()).await?;
        adapter.insert_customer(customer).await?;
        adapter.insert_account(account.clone()).await?;
        if request.inactive {
            adapter
                .set_account_status(account.id, AccountStatus::Inactive)
                .await?;
        }
        if request.credit_blocked || request.inactive {
            let status = if request.inactive {
                MerchantStatus::Inactive
            } else {
                MerchantStatus::Active
            };
            adapter
                .set_merchant_flags(merchant.id, status, request.credit_blocked)
                .await?;
        }
        Ok::<_, ledger::LedgerError>(())
    }
    .await;

    match result {
        Ok(()) => json!({ "merchantId": merchant.id, "accountId": account.id, "iban": account.iban }),
        Err(err) => {
            warn!(error = %err, "onboarding failed");
            json!({ "error": err.to_string() })
        }
    }
}

fn response_line(op: &str, response: &SettlementResponse) -> serde_json::Value {
    json!({ "op": op, "httpStatus": response.http_status, "response": response })
}

async fn replay(
    gateway: &Gateway,
    input: Box<dyn AsyncBufRead + Unpin + Send>,
) -> std::io::Result<usize> {
    let mut lines = input.lines();
    let mut stdout = tokio::io::stdout();
    let mut handled = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "skipping malformed envelope");
                continue;
            }
        };

        let op = envelope.name();
        let output = match envelope {
            Envelope::Onboard(req) => json!({ "op": op, "result": onboard(gateway, req).await }),
            Envelope::Credit(req) => response_line(op, &gateway.credit(req).await),
            Envelope::Reversal(req) => response_line(op, &gateway.reversal(req).await),
            Envelope::TitleFetch(req) => response_line(op, &gateway.title_fetch(req).await),
            Envelope::Withdraw(req) => response_line(op, &gateway.withdraw(req).await),
            Envelope::WithdrawResult(req) => {
                response_line(op, &gateway.withdraw_result(req).await)
            }
        };

        stdout.write_all(output.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        handled += 1;
    }

    stdout.flush().await?;
    Ok(handled)
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let gateway = match bootstrap::connect(&config, Arc::new(LogNotifier)).await {
        Ok(gateway) => gateway,
        Err(err) => {
            error!(error = %err, "gateway startup failed");
            return ExitCode::FAILURE;
        }
    };

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match std::env::args().nth(1) {
        Some(path) => match tokio::fs::File::open(&path).await {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(err) => {
                error!(%path, error = %err, "cannot open input");
                return ExitCode::FAILURE;
            }
        },
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    match replay(&gateway, input).await {
        Ok(handled) => {
            info!(handled, "replay finished");
            // Let detached notifications drain before the runtime stops.
            tokio::time::sleep(config.ledger_options().notify_timeout.min(
                std::time::Duration::from_millis(200),
            ))
            .await;
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "replay aborted");
            ExitCode::FAILURE
        }
    }
}
