use std::sync::Arc;

use ledger::adapters::MemoryAdapter;
use ledger::{
    Account, AccountStatus, Customer, Ledger, LedgerAdapter, MemoryPrincipalLock, Merchant,
    MerchantStatus, PrincipalLock, Serializer,
};
use raast::{
    CreditRequest, FlatLimit, Gateway, ReversalRequest, SettlementResponse, StaticBankDirectory,
    TitleFetchRequest, WithdrawRequest, WithdrawResultRequest,
};
use serde_json::json;
use uuid::Uuid;

const IBAN: &str = "PK36SCBL0000001123456702";
const SENDER: &str = "PK12HABB0000009876543210";
const PHONE: &str = "03001234567";

struct Harness {
    gateway: Gateway,
    lock: Arc<MemoryPrincipalLock>,
    adapter: Arc<MemoryAdapter>,
    merchant: Merchant,
    account: Account,
}

async fn setup() -> Harness {
    let adapter = Arc::new(MemoryAdapter::new());
    let merchant = Merchant::new(PHONE);
    let customer = Customer::new(merchant.id, "R-1", "3520200000000", "Ali Traders");
    let account = Account::new(customer.id, IBAN, "Ali Traders").activated();
    adapter.insert_merchant(merchant.clone()).await.unwrap();
    adapter.insert_customer(customer).await.unwrap();
    adapter.insert_account(account.clone()).await.unwrap();

    let lock = Arc::new(MemoryPrincipalLock::new());
    let gateway = Gateway::new(
        Ledger::new(adapter.clone()),
        Serializer::new(lock.clone(), Vec::new()),
    )
    .with_banks(Arc::new(StaticBankDirectory::new().with_bank("588974", "HBL")));

    Harness {
        gateway,
        lock,
        adapter,
        merchant,
        account,
    }
}

fn credit_request(amount: serde_json::Value, rrn: &str) -> CreditRequest {
    CreditRequest {
        to_account_number: Some(IBAN.to_string()),
        transaction_amount: Some(amount),
        from_account_number: Some(SENDER.to_string()),
        from_bank_imd: Some("588974".to_string()),
        rrn: Some(rrn.to_string()),
        stan: Some("000321".to_string()),
        transmission_date: Some("1016".to_string()),
        transmission_time: Some("101500".to_string()),
        sender_name: Some("Sara".to_string()),
        msgid: None,
    }
}

async fn balance(h: &Harness) -> i64 {
    h.adapter
        .get_merchant(h.merchant.id)
        .await
        .unwrap()
        .unwrap()
        .current_balance
}

fn withdraw_id(started: &SettlementResponse) -> Option<Uuid> {
    started
        .withdraw_id
        .as_deref()
        .map(|id| id.parse::<Uuid>().unwrap())
}

/// Fund `funding` and start a withdraw of `amount`.
async fn pending_withdraw(h: &Harness, funding: i64, amount: i64) -> SettlementResponse {
    h.gateway
        .credit(credit_request(json!(funding), "RRN-FUND"))
        .await;
    let started = h
        .gateway
        .withdraw(WithdrawRequest {
            account_number: Some(IBAN.to_string()),
            transaction_amount: Some(json!(amount)),
            to_account_number: Some(SENDER.to_string()),
            bank_name: Some("HBL".to_string()),
        })
        .await;
    assert_eq!(started.status.as_deref(), Some("PENDING"));
    started
}

fn failed_result(started: &SettlementResponse, amount: i64) -> WithdrawResultRequest {
    WithdrawResultRequest {
        withdraw_id: withdraw_id(started),
        account_number: Some(IBAN.to_string()),
        transaction_amount: Some(json!(amount)),
        success: Some(false),
        failure_reason: Some("Beneficiary bank offline".to_string()),
        ..Default::default()
    }
}

/// Fund, withdraw and settle `amount` with the rail message id `msgid`.
async fn settled_withdraw(h: &Harness, amount: i64, msgid: &str) {
    let funded = h
        .gateway
        .credit(credit_request(json!(amount), "RRN-FUND"))
        .await;
    assert_eq!(funded.code(), Some("000"));

    let started = h
        .gateway
        .withdraw(WithdrawRequest {
            account_number: Some(IBAN.to_string()),
            transaction_amount: Some(json!(amount)),
            to_account_number: Some(SENDER.to_string()),
            bank_name: Some("HBL".to_string()),
        })
        .await;
    assert_eq!(started.status.as_deref(), Some("PENDING"));

    let settled = h
        .gateway
        .withdraw_result(WithdrawResultRequest {
            withdraw_id: withdraw_id(&started),
            account_number: Some(IBAN.to_string()),
            transaction_amount: Some(json!(amount)),
            to_account_number: Some(SENDER.to_string()),
            bank_name: Some("HBL".to_string()),
            success: Some(true),
            rrn: Some("RRN-OUT".to_string()),
            msgid: Some(msgid.to_string()),
            ..Default::default()
        })
        .await;
    assert_eq!(settled.code(), Some("000"));
    assert_eq!(settled.status.as_deref(), Some("COMPLETED"));
}

fn reversal_request(amount: i64, rrn: &str, msgid: &str) -> ReversalRequest {
    ReversalRequest {
        account_number: Some(IBAN.to_string()),
        transaction_amount: Some(json!(amount)),
        rrn: Some(rrn.to_string()),
        stan: Some("000999".to_string()),
        transmission_date: Some("1016".to_string()),
        transmission_time: Some("120000".to_string()),
        msgid: Some(msgid.to_string()),
    }
}

#[tokio::test]
async fn test_credit_success() {
    let h = setup().await;

    let response = h.gateway.credit(credit_request(json!("5000"), "RRN-1")).await;

    assert_eq!(response.http_status, 200);
    assert_eq!(response.code(), Some("000"));
    assert!(response.transaction_log_id.is_some());
    assert_eq!(balance(&h).await, 5000);
}

#[tokio::test]
async fn test_credit_duplicate_rrn() {
    let h = setup().await;
    h.gateway.credit(credit_request(json!(5000), "RRN-1")).await;

    let again = h.gateway.credit(credit_request(json!(5000), "RRN-1")).await;
    assert_eq!(again.code(), Some("012"));
    assert_eq!(
        again.response_description.as_deref(),
        Some("Payment is a duplicate of another payment")
    );

    // The duplicate check runs before the amount bound check.
    let zero = h.gateway.credit(credit_request(json!(0), "RRN-1")).await;
    assert_eq!(zero.code(), Some("012"));
    assert_eq!(balance(&h).await, 5000);
}

#[tokio::test]
async fn test_credit_invalid_amounts() {
    let h = setup().await;

    for amount in [json!("abc"), json!(-100), json!(0), json!(12.5), json!(2_147_483_648i64)] {
        let response = h.gateway.credit(credit_request(amount, "RRN-1")).await;
        assert_eq!(response.code(), Some("010"));
    }

    let mut missing = credit_request(json!(1), "RRN-1");
    missing.transaction_amount = None;
    assert_eq!(h.gateway.credit(missing).await.code(), Some("010"));
    assert_eq!(balance(&h).await, 0);
}

#[tokio::test]
async fn test_credit_unknown_account() {
    let h = setup().await;
    let mut request = credit_request(json!(100), "RRN-1");
    request.to_account_number = Some("PK00NOPE0000000000000000".to_string());

    assert_eq!(h.gateway.credit(request).await.code(), Some("001"));
}

#[tokio::test]
async fn test_credit_over_limit() {
    let h = setup().await;
    let gateway = h.gateway.clone().with_limits(Arc::new(FlatLimit(1000)));

    let response = gateway.credit(credit_request(json!(5000), "RRN-1")).await;
    assert_eq!(response.code(), Some("007"));
    assert_eq!(balance(&h).await, 0);
}

#[tokio::test]
async fn test_credit_gates() {
    let h = setup().await;

    h.adapter
        .set_merchant_flags(h.merchant.id, MerchantStatus::Active, true)
        .await
        .unwrap();
    let blocked = h.gateway.credit(credit_request(json!(100), "RRN-1")).await;
    assert_eq!(blocked.code(), Some("004"));

    h.adapter
        .set_account_status(h.account.id, AccountStatus::Inactive)
        .await
        .unwrap();
    let inactive = h.gateway.credit(credit_request(json!(100), "RRN-1")).await;
    assert_eq!(inactive.code(), Some("008"));
    assert_eq!(balance(&h).await, 0);
}

#[tokio::test]
async fn test_credit_unknown_bank() {
    let h = setup().await;
    let mut request = credit_request(json!(100), "RRN-1");
    request.from_bank_imd = Some("999999".to_string());

    assert_eq!(h.gateway.credit(request).await.code(), Some("020"));
    assert_eq!(balance(&h).await, 0);
}

#[tokio::test]
async fn test_busy_principal_gets_429() {
    let h = setup().await;
    let held = h.lock.try_acquire(PHONE).await.unwrap().unwrap();

    let response = h.gateway.credit(credit_request(json!(100), "RRN-1")).await;
    assert_eq!(response.http_status, 429);
    assert_eq!(response.detail.as_deref(), Some("Too many requests"));
    assert_eq!(response.response_code, None);

    drop(held);
    let retried = h.gateway.credit(credit_request(json!(100), "RRN-1")).await;
    assert_eq!(retried.code(), Some("000"));
    assert_eq!(balance(&h).await, 100);
}

#[tokio::test]
async fn test_title_fetch() {
    let h = setup().await;

    let found = h
        .gateway
        .title_fetch(TitleFetchRequest {
            to_account_number: Some(" pk36scbl0000001123456702 ".to_string()),
        })
        .await;
    assert_eq!(found.code(), Some("000"));
    assert_eq!(found.account_title.as_deref(), Some("Ali Traders"));
    assert_eq!(found.beneficiary_iban.as_deref(), Some(IBAN));

    let missing = h
        .gateway
        .title_fetch(TitleFetchRequest {
            to_account_number: None,
        })
        .await;
    assert_eq!(missing.code(), Some("001"));
}

#[tokio::test]
async fn test_reversal_by_message_id() {
    let h = setup().await;
    settled_withdraw(&h, 3000, "MSG-1").await;
    assert_eq!(balance(&h).await, 0);

    let reversed = h
        .gateway
        .reversal(reversal_request(3000, "RRN-REV", "MSG-1"))
        .await;
    assert_eq!(reversed.code(), Some("000"));
    assert!(reversed.transaction_log_id.is_some());
    assert_eq!(balance(&h).await, 3000);

    // Same rrn is caught by the guard, a fresh one by the reversal index.
    let same_rrn = h
        .gateway
        .reversal(reversal_request(3000, "RRN-REV", "MSG-1"))
        .await;
    assert_eq!(same_rrn.code(), Some("012"));
    let fresh_rrn = h
        .gateway
        .reversal(reversal_request(3000, "RRN-REV-2", "MSG-1"))
        .await;
    assert_eq!(fresh_rrn.code(), Some("011"));
    assert_eq!(balance(&h).await, 3000);
}

#[tokio::test]
async fn test_reversal_without_original() {
    let h = setup().await;
    settled_withdraw(&h, 3000, "MSG-1").await;

    let response = h
        .gateway
        .reversal(reversal_request(3000, "RRN-REV", "MSG-UNKNOWN"))
        .await;
    assert_eq!(response.code(), Some("015"));
    assert_eq!(balance(&h).await, 0);
}

#[tokio::test]
async fn test_failed_withdraw_result_reports_refund() {
    let h = setup().await;
    let started = pending_withdraw(&h, 5000, 2000).await;
    assert_eq!(balance(&h).await, 3000);

    let result = h.gateway.withdraw_result(failed_result(&started, 2000)).await;

    assert_eq!(result.code(), Some("000"));
    assert_eq!(result.status.as_deref(), Some("FAILED"));
    assert!(result.refund_reference.is_some());
    assert_eq!(balance(&h).await, 5000);
}

#[tokio::test]
async fn test_repeated_failed_withdraw_result_is_already_returned() {
    let h = setup().await;
    let started = pending_withdraw(&h, 5000, 2000).await;

    let first = h.gateway.withdraw_result(failed_result(&started, 2000)).await;
    assert_eq!(first.code(), Some("000"));

    let second = h.gateway.withdraw_result(failed_result(&started, 2000)).await;
    assert_eq!(second.code(), Some("011"));
    assert_eq!(
        second.response_description.as_deref(),
        Some("Already returned original SCT")
    );
    assert_eq!(balance(&h).await, 5000);
    assert!(!h.lock.is_held(PHONE));
}

#[tokio::test]
async fn test_withdraw_result_without_outcome_is_rejected() {
    let h = setup().await;
    let started = pending_withdraw(&h, 5000, 2000).await;

    let mut request = failed_result(&started, 2000);
    request.success = None;
    request.failure_reason = None;
    request.rrn = Some("RRN-OUT".to_string());
    let response = h.gateway.withdraw_result(request).await;

    assert_eq!(response.code(), Some("021"));
    assert_eq!(response.status, None);
    assert_eq!(balance(&h).await, 3000);

    // The withdraw is still open and settles normally afterwards.
    let mut settle = failed_result(&started, 2000);
    settle.success = Some(true);
    settle.to_account_number = Some(SENDER.to_string());
    let settled = h.gateway.withdraw_result(settle).await;
    assert_eq!(settled.status.as_deref(), Some("COMPLETED"));
    assert_eq!(balance(&h).await, 3000);
}

#[tokio::test]
async fn test_withdraw_over_balance_is_technical() {
    let h = setup().await;

    let response = h
        .gateway
        .withdraw(WithdrawRequest {
            account_number: Some(IBAN.to_string()),
            transaction_amount: Some(json!(1)),
            to_account_number: Some(SENDER.to_string()),
            bank_name: None,
        })
        .await;
    assert_eq!(response.code(), Some("021"));
    assert!(!h.lock.is_held(PHONE));
}
