// ledger/src/adapters/postgres.rs
use std::collections::HashMap;

use crate::{
    Account, AccountId, AccountStatus, Action, ActionId, Customer, CustomerId, ExecutionPlan, Gate,
    LedgerAdapter, LedgerError, Merchant, MerchantId, MerchantStatus, Operation, Receipt,
    Transaction, TransactionId, action::cap_debug_balance,
};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use tracing::warn;

const RRN_INDEX: &str = "idx_raast_transactions_rrn";
const REVERSAL_INDEX: &str = "idx_raast_transactions_reversal_ref";

type PgTx<'a> = sqlx::Transaction<'a, Postgres>;

#[derive(Clone)]
pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS raast_merchants (
                id UUID PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                current_balance BIGINT NOT NULL DEFAULT 0,
                status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'INACTIVE', 'ON_HOLD')),
                credit_blocked BOOLEAN NOT NULL DEFAULT FALSE,
                secret_key TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS raast_customers (
                id UUID PRIMARY KEY,
                merchant_id UUID NOT NULL UNIQUE REFERENCES raast_merchants(id),
                record_id TEXT NOT NULL,
                cnic TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS raast_accounts (
                id UUID PRIMARY KEY,
                customer_id UUID NOT NULL REFERENCES raast_customers(id),
                iban TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('unavailable', 'available', 'active', 'inactive')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS raast_actions (
                id UUID PRIMARY KEY,
                user_friendly_id TEXT NOT NULL UNIQUE
                    CHECK (user_friendly_id !~ '^[-=]'),
                merchant_id UUID NOT NULL REFERENCES raast_merchants(id),
                type TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('PENDING', 'COMPLETED', 'FAILED')),
                delta BIGINT NOT NULL,
                debug_balance INTEGER NOT NULL,
                reference TEXT NOT NULL,
                reference_type TEXT NOT NULL,
                comment TEXT NOT NULL,
                failure_reason TEXT,
                bank_name TEXT,
                remote_reference_id TEXT,
                partner TEXT,
                linked_action UUID REFERENCES raast_actions(id) DEFERRABLE INITIALLY DEFERRED,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_raast_actions_merchant
            ON raast_actions(merchant_id, created_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS raast_transactions (
                id UUID PRIMARY KEY,
                account_id UUID NOT NULL REFERENCES raast_accounts(id),
                action_id UUID NOT NULL UNIQUE REFERENCES raast_actions(id),
                type TEXT NOT NULL CHECK (type IN ('CREDIT', 'DEBIT', 'REVERSAL')),
                amount BIGINT NOT NULL CHECK (amount > 0 AND amount <= 2147483647),
                from_iban TEXT,
                to_iban TEXT NOT NULL,
                bank_name TEXT NOT NULL,
                reference TEXT,
                rrn TEXT,
                stan TEXT,
                transmission_date_time TEXT,
                payment_identifier TEXT,
                transaction_identifier TEXT,
                sender_name TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_raast_transactions_rrn
            ON raast_transactions(rrn)
            WHERE type IN ('CREDIT', 'DEBIT') AND rrn IS NOT NULL
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_raast_transactions_reversal_ref
            ON raast_transactions(account_id, reference)
            WHERE type = 'REVERSAL'
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_raast_transactions_payment_identifier
            ON raast_transactions(account_id, payment_identifier)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn lock_merchant(tx: &mut PgTx<'_>, id: MerchantId) -> Result<Merchant, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, current_balance, status, credit_blocked, secret_key, created_at
            FROM raast_merchants
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| LedgerError::Storage(format!("merchant {id} missing")))?;

        merchant_from_row(&row)
    }

    async fn insert_action_tx(tx: &mut PgTx<'_>, action: &Action) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO raast_actions (
                id, user_friendly_id, merchant_id, type, status, delta, debug_balance,
                reference, reference_type, comment, failure_reason, bank_name,
                remote_reference_id, partner, linked_action, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(action.id)
        .bind(&action.user_friendly_id)
        .bind(action.merchant_id)
        .bind(action.kind.as_str())
        .bind(action.status.as_str())
        .bind(action.delta)
        .bind(action.debug_balance)
        .bind(&action.reference)
        .bind(action.reference_type.as_str())
        .bind(&action.comment)
        .bind(&action.failure_reason)
        .bind(&action.bank_name)
        .bind(&action.remote_reference_id)
        .bind(&action.partner)
        .bind(action.linked_action)
        .bind(action.created_at)
        .execute(&mut **tx)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn insert_transaction_tx(
        tx: &mut PgTx<'_>,
        transaction: &Transaction,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO raast_transactions (
                id, account_id, action_id, type, amount, from_iban, to_iban, bank_name,
                reference, rrn, stan, transmission_date_time, payment_identifier,
                transaction_identifier, sender_name, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.account_id)
        .bind(transaction.action_id)
        .bind(transaction.kind.as_str())
        .bind(transaction.amount)
        .bind(&transaction.from_iban)
        .bind(&transaction.to_iban)
        .bind(&transaction.bank_name)
        .bind(&transaction.reference)
        .bind(&transaction.rrn)
        .bind(&transaction.stan)
        .bind(&transaction.transmission_date_time)
        .bind(&transaction.payment_identifier)
        .bind(&transaction.transaction_identifier)
        .bind(&transaction.sender_name)
        .bind(transaction.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.constraint() == Some(RRN_INDEX) => {
                LedgerError::DuplicatePayment(transaction.rrn.clone().unwrap_or_default())
            }
            sqlx::Error::Database(ref db) if db.constraint() == Some(REVERSAL_INDEX) => {
                LedgerError::AlreadyReturned
            }
            other => map_unique_violation(other),
        })?;
        Ok(())
    }

    async fn run_plan(
        &self,
        tx: &mut PgTx<'_>,
        plan: &ExecutionPlan,
        locks: &[MerchantId],
    ) -> Result<Receipt, LedgerError> {
        // ── Phase 1: lock merchant rows ────────────────────────────────────────
        let mut locked: HashMap<MerchantId, Merchant> = HashMap::new();
        for id in locks {
            locked.insert(*id, Self::lock_merchant(tx, *id).await?);
        }

        // ── Phase 2: execute operations ────────────────────────────────────────
        let mut posted: Vec<Action> = Vec::new();
        let mut annotated: Vec<Action> = Vec::new();
        let mut recorded: Vec<Transaction> = Vec::new();

        for op in plan.operations() {
            match op {
                Operation::Post { action, gate } => {
                    let merchant = locked.get_mut(&action.merchant_id).ok_or_else(|| {
                        LedgerError::Storage(format!("merchant {} not locked", action.merchant_id))
                    })?;
                    let balance = merchant
                        .current_balance
                        .checked_add(action.delta)
                        .ok_or(LedgerError::InvalidAmount)?;

                    let account = match gate {
                        Gate::Credit { account_id } => fetch_account(&mut **tx, *account_id).await?,
                        _ => None,
                    };
                    gate.check(merchant, account.as_ref(), balance)?;

                    sqlx::query("UPDATE raast_merchants SET current_balance = $2 WHERE id = $1")
                        .bind(merchant.id)
                        .bind(balance)
                        .execute(&mut **tx)
                        .await?;
                    merchant.current_balance = balance;

                    let mut row = action.clone();
                    row.debug_balance = cap_debug_balance(balance);
                    Self::insert_action_tx(tx, &row).await?;
                    posted.push(row);
                }
                Operation::Annotate(annotation) => {
                    let found = sqlx::query(&format!("{ACTION_SELECT} WHERE id = $1 FOR UPDATE"))
                        .bind(annotation.action_id)
                        .fetch_optional(&mut **tx)
                        .await?;
                    let mut action = match found {
                        Some(row) => action_from_row(&row)?,
                        None => {
                            return Err(LedgerError::Conflict(format!(
                                "action {} not found for annotation",
                                annotation.action_id
                            )));
                        }
                    };
                    annotation.apply_to(&mut action)?;

                    sqlx::query(
                        r#"
                        UPDATE raast_actions
                        SET status = $2, reference = $3, failure_reason = $4, linked_action = $5
                        WHERE id = $1
                        "#,
                    )
                    .bind(action.id)
                    .bind(action.status.as_str())
                    .bind(&action.reference)
                    .bind(&action.failure_reason)
                    .bind(action.linked_action)
                    .execute(&mut **tx)
                    .await?;

                    if let Some(earlier) = posted
                        .iter_mut()
                        .chain(annotated.iter_mut())
                        .find(|a| a.id == action.id)
                    {
                        *earlier = action;
                    } else {
                        annotated.push(action);
                    }
                }
                Operation::Record { transaction } => {
                    Self::insert_transaction_tx(tx, transaction).await?;
                    recorded.push(transaction.clone());
                }
            }
        }

        Ok(Receipt {
            posted,
            annotated,
            recorded,
        })
    }
}

const ACTION_SELECT: &str = r#"
    SELECT id, user_friendly_id, merchant_id, type, status, delta, debug_balance, reference,
           reference_type, comment, failure_reason, bank_name, remote_reference_id, partner,
           linked_action, created_at
    FROM raast_actions
"#;

const TRANSACTION_SELECT: &str = r#"
    SELECT id, account_id, action_id, type, amount, from_iban, to_iban, bank_name, reference,
           rrn, stan, transmission_date_time, payment_identifier, transaction_identifier,
           sender_name, created_at
    FROM raast_transactions
"#;

fn map_unique_violation(err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            LedgerError::Conflict(db.message().to_string())
        }
        other => LedgerError::Storage(other.to_string()),
    }
}

fn parse<T: std::str::FromStr<Err = LedgerError>>(row: &PgRow, column: &str) -> Result<T, LedgerError> {
    row.try_get::<String, _>(column)?.parse()
}

fn merchant_from_row(row: &PgRow) -> Result<Merchant, LedgerError> {
    Ok(Merchant {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        current_balance: row.try_get("current_balance")?,
        status: parse::<MerchantStatus>(row, "status")?,
        credit_blocked: row.try_get("credit_blocked")?,
        secret_key: row.try_get("secret_key")?,
        created_at: row.try_get("created_at")?,
    })
}

fn customer_from_row(row: &PgRow) -> Result<Customer, LedgerError> {
    Ok(Customer {
        id: row.try_get("id")?,
        merchant_id: row.try_get("merchant_id")?,
        record_id: row.try_get("record_id")?,
        cnic: row.try_get("cnic")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, LedgerError> {
    Ok(Account {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        iban: row.try_get("iban")?,
        title: row.try_get("title")?,
        status: parse::<AccountStatus>(row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

fn action_from_row(row: &PgRow) -> Result<Action, LedgerError> {
    Ok(Action {
        id: row.try_get("id")?,
        user_friendly_id: row.try_get("user_friendly_id")?,
        merchant_id: row.try_get("merchant_id")?,
        kind: parse(row, "type")?,
        status: parse(row, "status")?,
        delta: row.try_get("delta")?,
        debug_balance: row.try_get("debug_balance")?,
        reference: row.try_get("reference")?,
        reference_type: parse(row, "reference_type")?,
        comment: row.try_get("comment")?,
        failure_reason: row.try_get("failure_reason")?,
        bank_name: row.try_get("bank_name")?,
        remote_reference_id: row.try_get("remote_reference_id")?,
        partner: row.try_get("partner")?,
        linked_action: row.try_get("linked_action")?,
        created_at: row.try_get("created_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, LedgerError> {
    Ok(Transaction {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        action_id: row.try_get("action_id")?,
        kind: parse(row, "type")?,
        amount: row.try_get("amount")?,
        from_iban: row.try_get("from_iban")?,
        to_iban: row.try_get("to_iban")?,
        bank_name: row.try_get("bank_name")?,
        reference: row.try_get("reference")?,
        rrn: row.try_get("rrn")?,
        stan: row.try_get("stan")?,
        transmission_date_time: row.try_get("transmission_date_time")?,
        payment_identifier: row.try_get("payment_identifier")?,
        transaction_identifier: row.try_get("transaction_identifier")?,
        sender_name: row.try_get("sender_name")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn fetch_account<'e, E>(executor: E, id: AccountId) -> Result<Option<Account>, LedgerError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        SELECT id, customer_id, iban, title, status, created_at
        FROM raast_accounts
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?
    .map(|row| account_from_row(&row))
    .transpose()
}

#[async_trait::async_trait]
impl LedgerAdapter for PostgresAdapter {
    async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        locks: &[MerchantId],
    ) -> Result<Receipt, LedgerError> {
        let mut tx = self.pool.begin().await?;

        match self.run_plan(&mut tx, plan, locks).await {
            Ok(receipt) => {
                tx.commit().await?;
                Ok(receipt)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed after plan error");
                }
                Err(err)
            }
        }
    }

    async fn get_merchant(&self, id: MerchantId) -> Result<Option<Merchant>, LedgerError> {
        sqlx::query(
            r#"
            SELECT id, username, current_balance, status, credit_blocked, secret_key, created_at
            FROM raast_merchants
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| merchant_from_row(&row))
        .transpose()
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, LedgerError> {
        sqlx::query(
            r#"
            SELECT id, merchant_id, record_id, cnic, name, created_at
            FROM raast_customers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| customer_from_row(&row))
        .transpose()
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        fetch_account(&self.pool, id).await
    }

    async fn get_account_by_iban(&self, iban: &str) -> Result<Option<Account>, LedgerError> {
        sqlx::query(
            r#"
            SELECT id, customer_id, iban, title, status, created_at
            FROM raast_accounts
            WHERE iban = $1
            "#,
        )
        .bind(iban)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| account_from_row(&row))
        .transpose()
    }

    async fn get_action(&self, id: ActionId) -> Result<Option<Action>, LedgerError> {
        sqlx::query(&format!("{ACTION_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| action_from_row(&row))
            .transpose()
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        sqlx::query(&format!("{TRANSACTION_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| transaction_from_row(&row))
            .transpose()
    }

    async fn transaction_for_action(
        &self,
        action_id: ActionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        sqlx::query(&format!("{TRANSACTION_SELECT} WHERE action_id = $1"))
            .bind(action_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| transaction_from_row(&row))
            .transpose()
    }

    async fn find_by_payment_identifier(
        &self,
        account_id: AccountId,
        payment_identifier: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        sqlx::query(&format!(
            "{TRANSACTION_SELECT} WHERE account_id = $1 AND payment_identifier = $2 AND type = 'DEBIT'"
        ))
        .bind(account_id)
        .bind(payment_identifier)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| transaction_from_row(&row))
        .transpose()
    }

    async fn rrn_exists(&self, rrn: &str) -> Result<bool, LedgerError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM raast_transactions WHERE rrn = $1)")
                .bind(rrn)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn reversal_exists(
        &self,
        account_id: AccountId,
        reference: &str,
    ) -> Result<bool, LedgerError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM raast_transactions
                WHERE account_id = $1 AND reference = $2 AND type = 'REVERSAL'
            )
            "#,
        )
        .bind(account_id)
        .bind(reference)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn actions_for_merchant(&self, id: MerchantId) -> Result<Vec<Action>, LedgerError> {
        let rows = sqlx::query(&format!(
            "{ACTION_SELECT} WHERE merchant_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(action_from_row).collect()
    }

    async fn insert_merchant(&self, merchant: Merchant) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO raast_merchants
                (id, username, current_balance, status, credit_blocked, secret_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(merchant.id)
        .bind(&merchant.username)
        .bind(merchant.current_balance)
        .bind(merchant.status.as_str())
        .bind(merchant.credit_blocked)
        .bind(&merchant.secret_key)
        .bind(merchant.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn insert_customer(&self, customer: Customer) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO raast_customers (id, merchant_id, record_id, cnic, name, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(customer.id)
        .bind(customer.merchant_id)
        .bind(&customer.record_id)
        .bind(&customer.cnic)
        .bind(&customer.name)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn insert_account(&self, account: Account) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO raast_accounts (id, customer_id, iban, title, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account.id)
        .bind(account.customer_id)
        .bind(&account.iban)
        .bind(&account.title)
        .bind(account.status.as_str())
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn set_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE raast_accounts SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_merchant_flags(
        &self,
        id: MerchantId,
        status: MerchantStatus,
        credit_blocked: bool,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE raast_merchants SET status = $2, credit_blocked = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(credit_blocked)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::Storage(format!("merchant {id} missing")));
        }
        Ok(())
    }
}
