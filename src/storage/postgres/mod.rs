//! PostgreSQL backend
//!
//! Every mutation is one transaction that sets a local lock timeout, locks
//! wallet rows with `FOR UPDATE` in (account, currency) order, applies the
//! change through [`Wallet`] and writes the rows back with their journal
//! entries. Status changes are compare-and-set updates.

mod deposits;
mod reports;
mod wallets;
mod withdrawals;

use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::LedgerError;
use crate::wallet::{BalanceChange, EntryType, LedgerEntry, Wallet, WalletKey};

const WALLET_COLUMNS: &str =
    "account_id, currency, balance, available_balance, reserved_balance, updated_at";

const ENTRY_COLUMNS: &str = "entry_id, account_id, currency, amount, balance_after, entry_type, \
     reference_id, reference_type, description, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a write transaction bounded by the configured lock wait.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let stmt = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms);
        sqlx::query(&stmt).execute(&mut *tx).await?;
        Ok(tx)
    }
}

/// NUMERIC(38, 18) comes back at full scale; strip the padding.
fn decimal(row: &PgRow, column: &str) -> Result<Decimal, LedgerError> {
    Ok(row.try_get::<Decimal, _>(column)?.normalize())
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, LedgerError> {
    Wallet::from_parts(
        row.try_get("account_id")?,
        row.try_get("currency")?,
        decimal(row, "balance")?,
        decimal(row, "available_balance")?,
        decimal(row, "reserved_balance")?,
        row.try_get("updated_at")?,
    )
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, LedgerError> {
    let entry_type: String = row.try_get("entry_type")?;
    Ok(LedgerEntry {
        id: row.try_get("entry_id")?,
        account_id: row.try_get("account_id")?,
        currency: row.try_get("currency")?,
        amount: decimal(row, "amount")?,
        balance_after: decimal(row, "balance_after")?,
        entry_type: EntryType::from_str(&entry_type)
            .map_err(|_| LedgerError::Integrity(format!("stored entry type {}", entry_type)))?,
        reference_id: row.try_get("reference_id")?,
        reference_type: row.try_get("reference_type")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Lock one wallet row for the rest of the transaction.
async fn lock_wallet(conn: &mut PgConnection, key: &WalletKey) -> Result<Wallet, LedgerError> {
    let sql = format!(
        "SELECT {} FROM wallets WHERE account_id = $1 AND currency = $2 FOR UPDATE",
        WALLET_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(&key.account_id)
        .bind(&key.currency)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::wallet_not_found(&key.account_id, &key.currency))?;
    wallet_from_row(&row)
}

async fn store_wallet(conn: &mut PgConnection, wallet: &Wallet) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE wallets
        SET balance = $3, available_balance = $4, reserved_balance = $5, updated_at = $6
        WHERE account_id = $1 AND currency = $2
        "#,
    )
    .bind(wallet.account_id())
    .bind(wallet.currency())
    .bind(wallet.balance())
    .bind(wallet.available_balance())
    .bind(wallet.reserved_balance())
    .bind(wallet.updated_at())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<(), LedgerError> {
    let sql = format!(
        "INSERT INTO ledger_entries ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        ENTRY_COLUMNS
    );
    sqlx::query(&sql)
        .bind(entry.id)
        .bind(&entry.account_id)
        .bind(&entry.currency)
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(entry.entry_type.as_str())
        .bind(&entry.reference_id)
        .bind(&entry.reference_type)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Lock every touched wallet in key order, apply all changes, write back.
async fn apply_changes(
    conn: &mut PgConnection,
    changes: &[BalanceChange],
) -> Result<Vec<LedgerEntry>, LedgerError> {
    let mut working: BTreeMap<WalletKey, Option<Wallet>> =
        changes.iter().map(|c| (c.key(), None)).collect();
    for (key, slot) in working.iter_mut() {
        *slot = Some(lock_wallet(conn, key).await?);
    }

    let mut entries = Vec::with_capacity(changes.len());
    for change in changes {
        let wallet = working
            .get_mut(&change.key())
            .and_then(Option::as_mut)
            .ok_or_else(|| LedgerError::Internal("wallet missing from batch".into()))?;
        entries.push(change.apply(wallet)?);
    }

    for wallet in working.values().flatten() {
        store_wallet(conn, wallet).await?;
    }
    for entry in &entries {
        insert_entry(conn, entry).await?;
    }
    Ok(entries)
}

/// Postgres stores BIGINT; counts never approach i64::MAX
fn to_db_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_db_count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}
