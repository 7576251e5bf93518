//! Outbound settlement collaborator (chain broadcast or bank payout)

use async_trait::async_trait;
use thiserror::Error;

use super::models::Withdrawal;
use crate::error::LedgerError;
use crate::retry::Retryable;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    /// Definitively refused; the withdrawal must fail
    #[error("Settlement rejected: {0}")]
    Rejected(String),

    #[error("Settlement service unavailable: {0}")]
    Unavailable(String),

    #[error("Settlement request timed out")]
    Timeout,
}

impl Retryable for SettlementError {
    fn is_retryable(&self) -> bool {
        !matches!(self, SettlementError::Rejected(_))
    }
}

impl From<SettlementError> for LedgerError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::Timeout => LedgerError::Timeout("settlement request".into()),
            other => LedgerError::ExternalService(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementStatus {
    Pending,
    Confirmed,
    Failed(String),
}

#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Submit the payout; returns the external reference (txid, payment id).
    async fn broadcast(&self, withdrawal: &Withdrawal) -> Result<String, SettlementError>;

    /// Current state of a previously broadcast payout.
    async fn check_status(&self, withdrawal: &Withdrawal) -> Result<SettlementStatus, SettlementError>;
}

/// Payouts executed by an operator outside the ledger
///
/// Broadcast only hands out a reference; the payout stays pending until a
/// `WithdrawalSettled` or `WithdrawalFailed` banking event resolves it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualSettlementClient;

#[async_trait]
impl SettlementClient for ManualSettlementClient {
    async fn broadcast(&self, withdrawal: &Withdrawal) -> Result<String, SettlementError> {
        Ok(format!("manual-{}", withdrawal.id.simple()))
    }

    async fn check_status(&self, _withdrawal: &Withdrawal) -> Result<SettlementStatus, SettlementError> {
        Ok(SettlementStatus::Pending)
    }
}

#[cfg(any(test, feature = "mock-api"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard};
    use uuid::Uuid;

    #[derive(Debug, Default)]
    struct MockSettlementState {
        fail_broadcast: Option<SettlementError>,
        statuses: HashMap<Uuid, SettlementStatus>,
        auto_confirm: bool,
    }

    /// Accepts every payout; confirms on the first status check when `auto_confirm` is set.
    #[derive(Debug, Default)]
    pub struct MockSettlementClient {
        state: Mutex<MockSettlementState>,
        broadcast_count: AtomicUsize,
    }

    impl MockSettlementClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn auto_confirming() -> Self {
            let client = Self::default();
            client.state().auto_confirm = true;
            client
        }

        fn state(&self) -> MutexGuard<'_, MockSettlementState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn set_fail_broadcast(&self, error: Option<SettlementError>) {
            self.state().fail_broadcast = error;
        }

        pub fn set_status(&self, id: Uuid, status: SettlementStatus) {
            self.state().statuses.insert(id, status);
        }

        pub fn broadcast_count(&self) -> usize {
            self.broadcast_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SettlementClient for MockSettlementClient {
        async fn broadcast(&self, withdrawal: &Withdrawal) -> Result<String, SettlementError> {
            self.broadcast_count.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.state().fail_broadcast.clone() {
                return Err(err);
            }
            Ok(format!("mock-{}", withdrawal.id.simple()))
        }

        async fn check_status(
            &self,
            withdrawal: &Withdrawal,
        ) -> Result<SettlementStatus, SettlementError> {
            let state = self.state();
            if let Some(status) = state.statuses.get(&withdrawal.id) {
                return Ok(status.clone());
            }
            Ok(if state.auto_confirm {
                SettlementStatus::Confirmed
            } else {
                SettlementStatus::Pending
            })
        }
    }
}
