use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Postgres, QueryBuilder, Row};
use std::str::FromStr;

use super::{
    ENTRY_COLUMNS, PgStore, WALLET_COLUMNS, apply_changes, entry_from_row, lock_wallet,
    store_wallet, wallet_from_row,
};
use crate::error::LedgerError;
use crate::wallet::{
    AccountService, AccountStatus, BalanceChange, EntryFilter, EntryPage, LedgerEntry,
    LedgerJournal, Page, Wallet, WalletKey, WalletStore,
};

impl PgStore {
    /// Lock, mutate and write back one wallet without journaling.
    async fn mutate_wallet<F>(
        &self,
        account_id: &str,
        currency: &str,
        f: F,
    ) -> Result<Wallet, LedgerError>
    where
        F: FnOnce(&mut Wallet) -> Result<(), LedgerError> + Send,
    {
        let mut tx = self.begin().await?;
        let mut wallet = lock_wallet(&mut *tx, &WalletKey::new(account_id, currency)).await?;
        f(&mut wallet)?;
        store_wallet(&mut *tx, &wallet).await?;
        tx.commit().await?;
        Ok(wallet)
    }
}

#[async_trait]
impl WalletStore for PgStore {
    async fn open_account(&self, account_id: &str, currencies: &[String]) -> Result<(), LedgerError> {
        let mut tx = self.begin().await?;
        sqlx::query("INSERT INTO accounts (account_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO wallets (account_id, currency)
            SELECT $1, unnest($2::varchar[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(currencies)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_account_status(&self, account_id: &str, status: AccountStatus) -> Result<(), LedgerError> {
        let result =
            sqlx::query("UPDATE accounts SET status = $2, updated_at = NOW() WHERE account_id = $1")
                .bind(account_id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(account_id.to_string()));
        }
        Ok(())
    }

    async fn get_wallet(&self, account_id: &str, currency: &str) -> Result<Wallet, LedgerError> {
        let sql = format!(
            "SELECT {} FROM wallets WHERE account_id = $1 AND currency = $2",
            WALLET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(currency)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::wallet_not_found(account_id, currency))?;
        wallet_from_row(&row)
    }

    async fn list_wallets(&self, account_id: &str) -> Result<Vec<Wallet>, LedgerError> {
        self.account_status(account_id).await?;
        let sql = format!(
            "SELECT {} FROM wallets WHERE account_id = $1 ORDER BY currency",
            WALLET_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(wallet_from_row).collect()
    }

    async fn reserve(&self, account_id: &str, currency: &str, amount: Decimal) -> Result<Wallet, LedgerError> {
        self.mutate_wallet(account_id, currency, move |w| w.reserve(amount))
            .await
    }

    async fn release(&self, account_id: &str, currency: &str, amount: Decimal) -> Result<Wallet, LedgerError> {
        self.mutate_wallet(account_id, currency, move |w| w.release(amount))
            .await
    }

    async fn apply_batch(&self, changes: Vec<BalanceChange>) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut tx = self.begin().await?;
        let entries = apply_changes(&mut *tx, &changes).await?;
        tx.commit().await?;
        Ok(entries)
    }
}

#[async_trait]
impl AccountService for PgStore {
    async fn account_status(&self, account_id: &str) -> Result<AccountStatus, LedgerError> {
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM accounts WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        AccountStatus::from_str(&status)
    }
}

#[async_trait]
impl LedgerJournal for PgStore {
    async fn list_entries(
        &self,
        account_id: &str,
        filter: &EntryFilter,
        page: Page,
    ) -> Result<EntryPage, LedgerError> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM ledger_entries WHERE account_id = ",
            ENTRY_COLUMNS
        ));
        query.push_bind(account_id);
        if let Some(currency) = &filter.currency {
            query.push(" AND currency = ").push_bind(currency.clone());
        }
        if let Some(entry_type) = filter.entry_type {
            query.push(" AND entry_type = ").push_bind(entry_type.as_str());
        }
        if let Some(from) = filter.from {
            query.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND created_at < ").push_bind(to);
        }
        query
            .push(" ORDER BY created_at DESC, seq DESC LIMIT ")
            .push_bind(i64::from(page.limit) + 1)
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset));

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let has_more = entries.len() > page.limit as usize;
        entries.truncate(page.limit as usize);
        Ok(EntryPage {
            entries,
            limit: page.limit,
            offset: page.offset,
            has_more,
        })
    }
}

/// Sum of journal amounts per wallet, for reconciliation
pub(super) fn ledger_sum_from_row(
    row: &sqlx::postgres::PgRow,
) -> Result<(WalletKey, Decimal), LedgerError> {
    let account_id: String = row.try_get("account_id")?;
    let currency: String = row.try_get("currency")?;
    let total: Decimal = row.try_get("total")?;
    Ok((WalletKey::new(&account_id, &currency), total.normalize()))
}
