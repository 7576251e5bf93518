//! Deposit FSM
//!
//! ```text
//! PENDING ──(threshold met)──▶ CONFIRMED ──(credit)──▶ CREDITED
//!    │                             │
//!    └──────────────▶ FAILED ◀─────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    /// Seen externally, waiting for confirmations
    Pending,
    /// Threshold met, wallet not yet credited
    Confirmed,
    /// Terminal: wallet credited exactly once
    Credited,
    /// Terminal: will never be credited
    Failed,
}

impl DepositStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositStatus::Credited | DepositStatus::Failed)
    }

    pub const ALL: [DepositStatus; 4] = [
        DepositStatus::Pending,
        DepositStatus::Confirmed,
        DepositStatus::Credited,
        DepositStatus::Failed,
    ];

    pub fn can_transition_to(&self, next: DepositStatus) -> bool {
        matches!(
            (self, next),
            (DepositStatus::Pending, DepositStatus::Confirmed)
                | (DepositStatus::Confirmed, DepositStatus::Credited)
                | (DepositStatus::Pending, DepositStatus::Failed)
                | (DepositStatus::Confirmed, DepositStatus::Failed)
        )
    }

    /// Stored names of every state allowed to move to `next`
    pub fn sources_of(next: DepositStatus) -> Vec<&'static str> {
        Self::ALL
            .iter()
            .filter(|s| s.can_transition_to(next))
            .map(DepositStatus::as_str)
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::Credited => "credited",
            DepositStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DepositStatus::Pending),
            "confirmed" => Ok(DepositStatus::Confirmed),
            "credited" => Ok(DepositStatus::Credited),
            "failed" => Ok(DepositStatus::Failed),
            other => Err(LedgerError::Integrity(format!(
                "unknown deposit status: {}",
                other
            ))),
        }
    }
}
