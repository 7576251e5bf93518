//! Deposit Credit Coordinator
//!
//! Drives deposits from detection to a single wallet credit. The credit step
//! is a conditional status update inside the same transaction as the wallet
//! change, so concurrent pollers and replayed webhooks credit at most once.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{ConfirmationUpdate, Deposit, DepositAddress, NewDeposit};
use super::state::DepositStatus;
use super::store::DepositStore;
use crate::chain::{ChainClients, ChainError};
use crate::error::LedgerError;
use crate::money::CurrencyRegistry;
use crate::retry::RetryPolicy;
use crate::wallet::LedgerEntry;

/// What happened to one deposit during a poll
#[derive(Debug, Clone, PartialEq)]
pub enum DepositOutcome {
    Waiting { confirmations: u64, required: u64 },
    Credited(LedgerEntry),
    /// Someone else credited it first
    AlreadyCredited,
    Failed(String),
    /// No chain client for the currency; settled by banking events instead
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub checked: usize,
    pub credited: usize,
    pub failed: usize,
    pub errors: usize,
}

pub struct DepositCreditCoordinator {
    store: Arc<dyn DepositStore>,
    currencies: Arc<CurrencyRegistry>,
    chains: ChainClients,
    retry: RetryPolicy,
    chain_timeout: Duration,
}

impl DepositCreditCoordinator {
    pub fn new(
        store: Arc<dyn DepositStore>,
        currencies: Arc<CurrencyRegistry>,
        chains: ChainClients,
        retry: RetryPolicy,
        chain_timeout: Duration,
    ) -> Self {
        Self {
            store,
            currencies,
            chains,
            retry,
            chain_timeout,
        }
    }

    /// Record a detected deposit. Repeats of the same (currency, txid) return the stored row.
    pub async fn record_deposit(&self, deposit: NewDeposit) -> Result<Deposit, LedgerError> {
        let spec = self.currencies.get(&deposit.currency)?;
        self.currencies
            .validate_positive(&deposit.currency, deposit.amount)?;
        if deposit.txid.trim().is_empty() {
            return Err(LedgerError::Validation("txid must not be empty".into()));
        }
        let required = u64::from(spec.required_confirmations);
        let stored = self.store.record_deposit(deposit.clone(), required).await?;

        if stored.amount != deposit.amount || stored.account_id != deposit.account_id {
            warn!(
                deposit_id = %stored.id,
                txid = %stored.txid,
                "Replayed deposit does not match stored record"
            );
            return Err(LedgerError::Validation(format!(
                "txid {} already recorded with different details",
                deposit.txid
            )));
        }
        info!(
            deposit_id = %stored.id,
            account_id = %stored.account_id,
            currency = %stored.currency,
            amount = %stored.amount,
            required,
            "Deposit recorded"
        );
        Ok(stored)
    }

    pub async fn register_address(&self, address: DepositAddress) -> Result<(), LedgerError> {
        self.currencies.get(&address.currency)?;
        if address.address.trim().is_empty() {
            return Err(LedgerError::Validation("address must not be empty".into()));
        }
        self.store.register_address(address).await
    }

    pub async fn get_deposit(&self, id: Uuid) -> Result<Deposit, LedgerError> {
        self.store.get_deposit(id).await
    }

    pub async fn list_deposits(&self, account_id: &str, limit: u32) -> Result<Vec<Deposit>, LedgerError> {
        self.store.list_deposits(account_id, limit.clamp(1, 500)).await
    }

    /// Check every non-terminal deposit in `currencies` once.
    ///
    /// A failure on one deposit is logged and counted; the rest of the batch
    /// still runs.
    pub async fn poll_once(&self, currencies: &[String], batch_size: usize) -> Result<PollSummary, LedgerError> {
        let active = self.store.list_active_deposits(currencies, batch_size).await?;
        let mut summary = PollSummary::default();

        for deposit in &active {
            summary.checked += 1;
            match self.process_deposit(deposit).await {
                Ok(DepositOutcome::Credited(_)) => summary.credited += 1,
                Ok(DepositOutcome::Failed(_)) => summary.failed += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.errors += 1;
                    error!(
                        deposit_id = %deposit.id,
                        txid = %deposit.txid,
                        error = %e,
                        "Failed to process deposit"
                    );
                }
            }
        }

        if summary.checked > 0 {
            debug!(
                checked = summary.checked,
                credited = summary.credited,
                failed = summary.failed,
                errors = summary.errors,
                "Deposit poll complete"
            );
        }
        Ok(summary)
    }

    /// Advance one deposit as far as current chain state allows.
    pub async fn process_deposit(&self, deposit: &Deposit) -> Result<DepositOutcome, LedgerError> {
        match deposit.status {
            DepositStatus::Credited => return Ok(DepositOutcome::AlreadyCredited),
            DepositStatus::Failed => {
                return Ok(DepositOutcome::Failed(
                    deposit.failure_reason.clone().unwrap_or_default(),
                ));
            }
            DepositStatus::Confirmed => return self.credit(deposit.id).await,
            DepositStatus::Pending => {}
        }

        let Some(client) = self.chains.get(&deposit.currency) else {
            return Ok(DepositOutcome::Skipped);
        };

        let txid = deposit.txid.as_str();
        let confirmations = self
            .retry
            .run("get_confirmations", move || async move {
                tokio::time::timeout(self.chain_timeout, client.get_confirmations(txid))
                    .await
                    .unwrap_or(Err(ChainError::Timeout))
            })
            .await;

        let confirmations = match confirmations {
            Ok(n) => n,
            Err(ChainError::TransactionFailed(_)) => {
                let reason = "transaction reverted on chain";
                self.fail(deposit.id, reason).await?;
                return Ok(DepositOutcome::Failed(reason.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        self.observe_confirmations(deposit.id, confirmations, deposit.required_confirmations)
            .await
    }

    /// Apply an externally reported confirmation count (poll or webhook).
    pub async fn observe_confirmations(
        &self,
        id: Uuid,
        confirmations: u64,
        required: u64,
    ) -> Result<DepositOutcome, LedgerError> {
        match self.store.record_confirmations(id, confirmations).await? {
            ConfirmationUpdate::Waiting => Ok(DepositOutcome::Waiting {
                confirmations,
                required,
            }),
            ConfirmationUpdate::Confirmed | ConfirmationUpdate::AlreadyConfirmed => {
                self.credit(id).await
            }
            ConfirmationUpdate::Terminal => {
                let current = self.store.get_deposit(id).await?;
                Ok(match current.status {
                    DepositStatus::Failed => {
                        DepositOutcome::Failed(current.failure_reason.unwrap_or_default())
                    }
                    _ => DepositOutcome::AlreadyCredited,
                })
            }
        }
    }

    /// Webhook entry point: look the deposit up and apply the count.
    pub async fn confirm(&self, id: Uuid, confirmations: u64) -> Result<DepositOutcome, LedgerError> {
        let deposit = self.store.get_deposit(id).await?;
        self.observe_confirmations(id, confirmations, deposit.required_confirmations)
            .await
    }

    /// Credit a confirmed deposit at most once.
    pub async fn credit(&self, id: Uuid) -> Result<DepositOutcome, LedgerError> {
        match self.store.credit_deposit(id).await? {
            Some(entry) => {
                info!(
                    deposit_id = %id,
                    account_id = %entry.account_id,
                    currency = %entry.currency,
                    amount = %entry.amount,
                    balance_after = %entry.balance_after,
                    "Deposit credited"
                );
                Ok(DepositOutcome::Credited(entry))
            }
            None => {
                debug!(deposit_id = %id, "Deposit not in confirmed state, credit skipped");
                Ok(DepositOutcome::AlreadyCredited)
            }
        }
    }

    pub async fn fail(&self, id: Uuid, reason: &str) -> Result<bool, LedgerError> {
        let failed = self.store.fail_deposit(id, reason).await?;
        if failed {
            warn!(deposit_id = %id, reason, "Deposit failed");
        } else {
            // Terminal already, or missing
            self.store.get_deposit(id).await?;
        }
        Ok(failed)
    }

    /// Record, confirm and credit a settled bank payment in one pass.
    pub async fn settle_bank_deposit(
        &self,
        account_id: &str,
        currency: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<DepositOutcome, LedgerError> {
        let deposit = self
            .record_deposit(NewDeposit {
                account_id: account_id.to_string(),
                currency: currency.to_string(),
                amount,
                address: reference.to_string(),
                txid: reference.to_string(),
                confirmations: 0,
            })
            .await?;
        let required = deposit.required_confirmations.max(1);
        self.observe_confirmations(deposit.id, required, required).await
    }
}
