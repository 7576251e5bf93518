use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use sqlx::Row;
use sqlx::types::Json;

use super::wallets::ledger_sum_from_row;
use super::{PgStore, WALLET_COLUMNS, wallet_from_row};
use crate::deposit::DepositAddress;
use crate::error::LedgerError;
use crate::proof::ProofOfReservesReport;
use crate::reconciliation::{LedgerSnapshot, ReconciliationReport, ReconciliationSource, ReportStore};

#[async_trait]
impl ReconciliationSource for PgStore {
    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let sql = format!("SELECT {} FROM wallets ORDER BY account_id, currency", WALLET_COLUMNS);
        let wallets = sqlx::query(&sql)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(wallet_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let ledger_sums = sqlx::query(
            r#"
            SELECT account_id, currency, SUM(amount) AS total
            FROM ledger_entries
            GROUP BY account_id, currency
            "#,
        )
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(ledger_sum_from_row)
        .collect::<Result<BTreeMap<_, _>, LedgerError>>()?;

        let addresses = sqlx::query("SELECT account_id, currency, address FROM deposit_addresses")
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| -> Result<DepositAddress, LedgerError> {
                Ok(DepositAddress {
                    account_id: row.try_get("account_id")?,
                    currency: row.try_get("currency")?,
                    address: row.try_get("address")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tx.commit().await?;
        Ok(LedgerSnapshot {
            wallets,
            ledger_sums,
            addresses,
            taken_at: Some(Utc::now()),
        })
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn save_reconciliation(&self, report: &ReconciliationReport) -> Result<(), LedgerError> {
        let status = serde_json::to_value(report.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        sqlx::query(
            "INSERT INTO reconciliation_reports (id, status, body, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(report.id)
        .bind(status)
        .bind(Json(report))
        .bind(report.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_reconciliation(&self) -> Result<Option<ReconciliationReport>, LedgerError> {
        let body = sqlx::query_scalar::<_, Json<ReconciliationReport>>(
            "SELECT body FROM reconciliation_reports ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(body.map(|Json(report)| report))
    }

    async fn save_proof_of_reserves(&self, report: &ProofOfReservesReport) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO proof_of_reserves_reports (id, merkle_root, body, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(report.id)
        .bind(&report.merkle_root)
        .bind(Json(report))
        .bind(report.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_proof_of_reserves(&self) -> Result<Option<ProofOfReservesReport>, LedgerError> {
        let body = sqlx::query_scalar::<_, Json<ProofOfReservesReport>>(
            "SELECT body FROM proof_of_reserves_reports ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(body.map(|Json(report)| report))
    }
}
