use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::DepositStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: Uuid,
    pub account_id: String,
    pub currency: String,
    pub amount: Decimal,
    /// Deposit address or bank reference the funds arrived at
    pub address: String,
    /// Chain transaction id or bank payment id; unique per currency
    pub txid: String,
    pub confirmations: u64,
    pub required_confirmations: u64,
    pub status: DepositStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub credited_at: Option<DateTime<Utc>>,
}

impl Deposit {
    pub fn threshold_met(&self) -> bool {
        self.confirmations >= self.required_confirmations
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeposit {
    pub account_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub address: String,
    pub txid: String,
    #[serde(default)]
    pub confirmations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub account_id: String,
    pub currency: String,
    pub address: String,
}

/// Outcome of recording a confirmation count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationUpdate {
    /// Count stored, threshold not yet met
    Waiting,
    /// This call moved the deposit from pending to confirmed
    Confirmed,
    /// Already confirmed earlier (credit still outstanding)
    AlreadyConfirmed,
    /// Terminal already; nothing written
    Terminal,
}
