use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgConnection, PgRow};
use std::str::FromStr;
use uuid::Uuid;

use super::{PgStore, apply_changes, decimal, lock_wallet, store_wallet};
use crate::error::LedgerError;
use crate::wallet::{LedgerEntry, WalletKey};
use crate::withdrawal::{
    NewWithdrawal, Withdrawal, WithdrawalStatus, WithdrawalStore, completion_changes,
};

const WITHDRAWAL_COLUMNS: &str = "id, account_id, currency, amount, fee, destination, \
     external_ref, status, failure_reason, created_at, updated_at";

fn withdrawal_from_row(row: &PgRow) -> Result<Withdrawal, LedgerError> {
    let status: String = row.try_get("status")?;
    Ok(Withdrawal {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        currency: row.try_get("currency")?,
        amount: decimal(row, "amount")?,
        fee: decimal(row, "fee")?,
        destination: row.try_get("destination")?,
        external_ref: row.try_get("external_ref")?,
        status: WithdrawalStatus::from_str(&status)?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn lock_withdrawal(conn: &mut PgConnection, id: Uuid) -> Result<Withdrawal, LedgerError> {
    let sql = format!(
        "SELECT {} FROM withdrawals WHERE id = $1 FOR UPDATE",
        WITHDRAWAL_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::WithdrawalNotFound(id))?;
    withdrawal_from_row(&row)
}

async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: WithdrawalStatus,
    failure_reason: Option<&str>,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE withdrawals
        SET status = $2, failure_reason = COALESCE($3, failure_reason), updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(failure_reason)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl WithdrawalStore for PgStore {
    async fn create_withdrawal(&self, request: NewWithdrawal) -> Result<Withdrawal, LedgerError> {
        let mut tx = self.begin().await?;
        let key = WalletKey::new(&request.account_id, &request.currency);
        let mut wallet = lock_wallet(&mut *tx, &key).await?;
        wallet.reserve(request.amount)?;
        store_wallet(&mut *tx, &wallet).await?;

        let sql = format!(
            r#"
            INSERT INTO withdrawals
                (id, account_id, currency, amount, fee, destination, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', NOW(), NOW())
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&request.account_id)
            .bind(&request.currency)
            .bind(request.amount)
            .bind(request.fee)
            .bind(&request.destination)
            .fetch_one(&mut *tx)
            .await?;
        let withdrawal = withdrawal_from_row(&row)?;
        tx.commit().await?;
        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        let sql = format!("SELECT {} FROM withdrawals WHERE id = $1", WITHDRAWAL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::WithdrawalNotFound(id))?;
        withdrawal_from_row(&row)
    }

    async fn list_withdrawals(&self, status: WithdrawalStatus, limit: usize) -> Result<Vec<Withdrawal>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM withdrawals WHERE status = $1 ORDER BY created_at LIMIT $2",
            WITHDRAWAL_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    async fn transition_withdrawal(
        &self,
        id: Uuid,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    ) -> Result<bool, LedgerError> {
        if !from.can_transition_to(to) {
            return Err(LedgerError::InvalidStateTransition(format!("{} -> {}", from, to)));
        }
        let result = sqlx::query(
            "UPDATE withdrawals SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            self.get_withdrawal(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn record_external_ref(&self, id: Uuid, external_ref: &str) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals SET external_ref = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(external_ref)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_withdrawal(&self, id: Uuid, reason: &str) -> Result<Option<Withdrawal>, LedgerError> {
        let mut tx = self.begin().await?;
        let current = lock_withdrawal(&mut *tx, id).await?;
        if !WithdrawalStatus::FAILABLE.contains(&current.status) {
            tx.rollback().await?;
            return Ok(None);
        }

        let key = WalletKey::new(&current.account_id, &current.currency);
        let mut wallet = lock_wallet(&mut *tx, &key).await?;
        wallet.release(current.amount)?;
        store_wallet(&mut *tx, &wallet).await?;
        set_status(&mut *tx, id, WithdrawalStatus::Failed, Some(reason)).await?;
        tx.commit().await?;

        Ok(Some(Withdrawal {
            status: WithdrawalStatus::Failed,
            failure_reason: Some(reason.to_string()),
            updated_at: chrono::Utc::now(),
            ..current
        }))
    }

    async fn complete_withdrawal(
        &self,
        id: Uuid,
        fee_account: Option<&str>,
    ) -> Result<Option<Vec<LedgerEntry>>, LedgerError> {
        let mut tx = self.begin().await?;
        let current = lock_withdrawal(&mut *tx, id).await?;
        if current.status != WithdrawalStatus::Processing {
            tx.rollback().await?;
            return Ok(None);
        }
        let entries = apply_changes(&mut *tx, &completion_changes(&current, fee_account)).await?;
        set_status(&mut *tx, id, WithdrawalStatus::Completed, None).await?;
        tx.commit().await?;
        Ok(Some(entries))
    }
}
