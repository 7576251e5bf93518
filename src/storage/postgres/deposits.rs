use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::str::FromStr;
use uuid::Uuid;

use super::{PgStore, apply_changes, decimal, from_db_count, to_db_count};
use crate::deposit::{
    ConfirmationUpdate, Deposit, DepositAddress, DepositStatus, DepositStore, NewDeposit,
};
use crate::error::LedgerError;
use crate::wallet::{BalanceChange, EntryType, LedgerEntry, Reference};

const DEPOSIT_COLUMNS: &str = "id, account_id, currency, amount, address, txid, confirmations, \
     required_confirmations, status, failure_reason, created_at, updated_at, credited_at";

fn deposit_from_row(row: &PgRow) -> Result<Deposit, LedgerError> {
    let status: String = row.try_get("status")?;
    Ok(Deposit {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        currency: row.try_get("currency")?,
        amount: decimal(row, "amount")?,
        address: row.try_get("address")?,
        txid: row.try_get("txid")?,
        confirmations: from_db_count(row.try_get("confirmations")?),
        required_confirmations: from_db_count(row.try_get("required_confirmations")?),
        status: DepositStatus::from_str(&status)?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        credited_at: row.try_get("credited_at")?,
    })
}

impl PgStore {
    async fn wallet_exists(&self, account_id: &str, currency: &str) -> Result<(), LedgerError> {
        let found = sqlx::query("SELECT 1 FROM wallets WHERE account_id = $1 AND currency = $2")
            .bind(account_id)
            .bind(currency)
            .fetch_optional(&self.pool)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(LedgerError::wallet_not_found(account_id, currency)),
        }
    }

    async fn find_deposit_by_txid(&self, currency: &str, txid: &str) -> Result<Option<Deposit>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM deposits WHERE currency = $1 AND txid = $2",
            DEPOSIT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(currency)
            .bind(txid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deposit_from_row).transpose()
    }
}

#[async_trait]
impl DepositStore for PgStore {
    async fn record_deposit(&self, deposit: NewDeposit, required_confirmations: u64) -> Result<Deposit, LedgerError> {
        if let Some(existing) = self.find_deposit_by_txid(&deposit.currency, &deposit.txid).await? {
            return Ok(existing);
        }
        self.wallet_exists(&deposit.account_id, &deposit.currency).await?;

        let sql = format!(
            r#"
            INSERT INTO deposits
                (id, account_id, currency, amount, address, txid, confirmations,
                 required_confirmations, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', NOW(), NOW())
            ON CONFLICT (currency, txid) DO NOTHING
            RETURNING {}
            "#,
            DEPOSIT_COLUMNS
        );
        let inserted = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&deposit.account_id)
            .bind(&deposit.currency)
            .bind(deposit.amount)
            .bind(&deposit.address)
            .bind(&deposit.txid)
            .bind(to_db_count(deposit.confirmations))
            .bind(to_db_count(required_confirmations))
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(row) => deposit_from_row(&row),
            // Lost the insert race; the winner's row is authoritative
            None => self
                .find_deposit_by_txid(&deposit.currency, &deposit.txid)
                .await?
                .ok_or_else(|| LedgerError::Internal("deposit vanished after conflict".into())),
        }
    }

    async fn get_deposit(&self, id: Uuid) -> Result<Deposit, LedgerError> {
        let sql = format!("SELECT {} FROM deposits WHERE id = $1", DEPOSIT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::DepositNotFound(id))?;
        deposit_from_row(&row)
    }

    async fn list_deposits(&self, account_id: &str, limit: u32) -> Result<Vec<Deposit>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM deposits WHERE account_id = $1 ORDER BY created_at DESC LIMIT $2",
            DEPOSIT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(deposit_from_row).collect()
    }

    async fn list_active_deposits(&self, currencies: &[String], limit: usize) -> Result<Vec<Deposit>, LedgerError> {
        let sql = format!(
            r#"
            SELECT {} FROM deposits
            WHERE status IN ('pending', 'confirmed') AND currency = ANY($1)
            ORDER BY created_at
            LIMIT $2
            "#,
            DEPOSIT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(currencies)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(deposit_from_row).collect()
    }

    async fn record_confirmations(&self, id: Uuid, confirmations: u64) -> Result<ConfirmationUpdate, LedgerError> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(
            "SELECT status, required_confirmations FROM deposits WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::DepositNotFound(id))?;
        let status = DepositStatus::from_str(&row.try_get::<String, _>("status")?)?;
        let required = from_db_count(row.try_get("required_confirmations")?);

        let (next, update) = match status {
            DepositStatus::Credited | DepositStatus::Failed => {
                return Ok(ConfirmationUpdate::Terminal);
            }
            DepositStatus::Confirmed => (DepositStatus::Confirmed, ConfirmationUpdate::AlreadyConfirmed),
            DepositStatus::Pending if confirmations >= required => {
                (DepositStatus::Confirmed, ConfirmationUpdate::Confirmed)
            }
            DepositStatus::Pending => (DepositStatus::Pending, ConfirmationUpdate::Waiting),
        };

        sqlx::query(
            r#"
            UPDATE deposits
            SET confirmations = GREATEST(confirmations, $2), status = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(to_db_count(confirmations))
        .bind(next.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(update)
    }

    async fn credit_deposit(&self, id: Uuid) -> Result<Option<LedgerEntry>, LedgerError> {
        let mut tx = self.begin().await?;
        // Conditional transition: at most one caller sees a row here
        let row = sqlx::query(
            r#"
            UPDATE deposits
            SET status = 'credited', credited_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING account_id, currency, amount, txid
            "#,
        )
        .bind(id)
        .bind(DepositStatus::sources_of(DepositStatus::Credited))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            self.get_deposit(id).await?;
            return Ok(None);
        };

        let account_id: String = row.try_get("account_id")?;
        let currency: String = row.try_get("currency")?;
        let txid: String = row.try_get("txid")?;
        let change = BalanceChange::credit(
            &account_id,
            &currency,
            decimal(&row, "amount")?,
            EntryType::Deposit,
        )
        .with_reference(Some(Reference::new("deposit", id.to_string())))
        .with_description(format!("deposit {}", txid));

        let mut entries = apply_changes(&mut *tx, std::slice::from_ref(&change)).await?;
        tx.commit().await?;
        Ok(entries.pop())
    }

    async fn fail_deposit(&self, id: Uuid, reason: &str) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE deposits
            SET status = 'failed', failure_reason = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(DepositStatus::sources_of(DepositStatus::Failed))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            self.get_deposit(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn register_address(&self, address: DepositAddress) -> Result<(), LedgerError> {
        self.wallet_exists(&address.account_id, &address.currency).await?;
        sqlx::query(
            r#"
            INSERT INTO deposit_addresses (currency, address, account_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (currency, address) DO NOTHING
            "#,
        )
        .bind(&address.currency)
        .bind(&address.address)
        .bind(&address.account_id)
        .execute(&self.pool)
        .await?;

        let owner = sqlx::query_scalar::<_, String>(
            "SELECT account_id FROM deposit_addresses WHERE currency = $1 AND address = $2",
        )
        .bind(&address.currency)
        .bind(&address.address)
        .fetch_one(&self.pool)
        .await?;
        if owner != address.account_id {
            return Err(LedgerError::Validation(format!(
                "address {} already belongs to another account",
                address.address
            )));
        }
        Ok(())
    }

    async fn deposit_addresses(&self, currency: &str) -> Result<Vec<DepositAddress>, LedgerError> {
        let rows = sqlx::query(
            "SELECT account_id, currency, address FROM deposit_addresses WHERE currency = $1 ORDER BY address",
        )
        .bind(currency)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<DepositAddress, LedgerError> {
                Ok(DepositAddress {
                    account_id: row.try_get("account_id")?,
                    currency: row.try_get("currency")?,
                    address: row.try_get("address")?,
                })
            })
            .collect()
    }
}
