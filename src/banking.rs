//! Banking settlement events
//!
//! The payment provider reports fiat settlement asynchronously. Events are
//! replay-safe: a repeated event resolves to the state the first one produced.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::deposit::{DepositCreditCoordinator, DepositOutcome, DepositStatus};
use crate::error::LedgerError;
use crate::money::CurrencyRegistry;
use crate::withdrawal::{WithdrawalSettlementCoordinator, WithdrawalStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BankingEvent {
    DepositSettled {
        account_id: String,
        currency: String,
        amount: Decimal,
        /// Provider payment id; unique per currency
        reference: String,
    },
    DepositFailed {
        deposit_id: Uuid,
        reason: String,
    },
    WithdrawalSettled {
        withdrawal_id: Uuid,
    },
    WithdrawalFailed {
        withdrawal_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BankingOutcome {
    DepositCredited { entry_id: Uuid, balance_after: Decimal },
    DepositFailed,
    WithdrawalCompleted { entries: usize },
    WithdrawalFailed,
    /// Replay of an event that was already applied
    Duplicate,
}

pub struct BankingEventProcessor {
    deposits: Arc<DepositCreditCoordinator>,
    withdrawals: Arc<WithdrawalSettlementCoordinator>,
    currencies: Arc<CurrencyRegistry>,
}

impl BankingEventProcessor {
    pub fn new(
        deposits: Arc<DepositCreditCoordinator>,
        withdrawals: Arc<WithdrawalSettlementCoordinator>,
        currencies: Arc<CurrencyRegistry>,
    ) -> Self {
        Self {
            deposits,
            withdrawals,
            currencies,
        }
    }

    pub async fn handle(&self, event: BankingEvent) -> Result<BankingOutcome, LedgerError> {
        info!(event = ?event, "Banking event received");
        match event {
            BankingEvent::DepositSettled {
                account_id,
                currency,
                amount,
                reference,
            } => {
                if self.currencies.get(&currency)?.is_crypto() {
                    return Err(LedgerError::Validation(format!(
                        "{} deposits are settled on chain",
                        currency
                    )));
                }
                let outcome = self
                    .deposits
                    .settle_bank_deposit(&account_id, &currency, amount, &reference)
                    .await?;
                match outcome {
                    DepositOutcome::Credited(entry) => Ok(BankingOutcome::DepositCredited {
                        entry_id: entry.id,
                        balance_after: entry.balance_after,
                    }),
                    DepositOutcome::Failed(reason) => Err(LedgerError::InvalidStateTransition(
                        format!("deposit {} already failed: {}", reference, reason),
                    )),
                    _ => Ok(BankingOutcome::Duplicate),
                }
            }
            BankingEvent::DepositFailed { deposit_id, reason } => {
                if self.deposits.fail(deposit_id, &reason).await? {
                    return Ok(BankingOutcome::DepositFailed);
                }
                let current = self.deposits.get_deposit(deposit_id).await?;
                match current.status {
                    DepositStatus::Failed => Ok(BankingOutcome::Duplicate),
                    status => Err(LedgerError::InvalidStateTransition(format!(
                        "deposit {} is {}",
                        deposit_id, status
                    ))),
                }
            }
            BankingEvent::WithdrawalSettled { withdrawal_id } => {
                match self.withdrawals.complete(withdrawal_id).await {
                    Ok(entries) => Ok(BankingOutcome::WithdrawalCompleted {
                        entries: entries.len(),
                    }),
                    Err(LedgerError::InvalidStateTransition(msg)) => {
                        self.replayed(withdrawal_id, WithdrawalStatus::Completed, msg)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            BankingEvent::WithdrawalFailed {
                withdrawal_id,
                reason,
            } => match self.withdrawals.fail(withdrawal_id, &reason).await {
                Ok(_) => Ok(BankingOutcome::WithdrawalFailed),
                Err(LedgerError::InvalidStateTransition(msg)) => {
                    self.replayed(withdrawal_id, WithdrawalStatus::Failed, msg)
                        .await
                }
                Err(e) => Err(e),
            },
        }
    }

    async fn replayed(
        &self,
        id: Uuid,
        expected: WithdrawalStatus,
        msg: String,
    ) -> Result<BankingOutcome, LedgerError> {
        let current = self.withdrawals.get(id).await?;
        if current.status == expected {
            Ok(BankingOutcome::Duplicate)
        } else {
            Err(LedgerError::InvalidStateTransition(msg))
        }
    }
}
