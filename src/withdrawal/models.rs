use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::WithdrawalStatus;
use crate::wallet::{BalanceChange, EntryType, Reference};

/// A withdrawal request
///
/// `amount` is the gross amount held from the account; `fee` is part of it,
/// so the destination receives `amount - fee`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub account_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub destination: String,
    pub external_ref: Option<String>,
    pub status: WithdrawalStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn net_amount(&self) -> Decimal {
        self.amount - self.fee
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWithdrawal {
    pub account_id: String,
    pub currency: String,
    pub amount: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    pub destination: String,
}

/// Journaled changes that settle a completed withdrawal
pub fn completion_changes(withdrawal: &Withdrawal, fee_account: Option<&str>) -> Vec<BalanceChange> {
    let reference = Some(Reference::new("withdrawal", withdrawal.id.to_string()));
    let mut changes = Vec::with_capacity(3);
    let net = withdrawal.net_amount();
    if net > Decimal::ZERO {
        changes.push(
            BalanceChange::consume_reserved(
                &withdrawal.account_id,
                &withdrawal.currency,
                net,
                EntryType::Withdrawal,
            )
            .with_reference(reference.clone())
            .with_description(format!("withdrawal to {}", withdrawal.destination)),
        );
    }
    if withdrawal.fee > Decimal::ZERO {
        changes.push(
            BalanceChange::consume_reserved(
                &withdrawal.account_id,
                &withdrawal.currency,
                withdrawal.fee,
                EntryType::Fee,
            )
            .with_reference(reference.clone())
            .with_description("withdrawal fee"),
        );
        if let Some(fee_account) = fee_account {
            changes.push(
                BalanceChange::credit(fee_account, &withdrawal.currency, withdrawal.fee, EntryType::Fee)
                    .with_reference(reference)
                    .with_description("withdrawal fee"),
            );
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::ChangeKind;

    fn withdrawal(amount: i64, fee: i64) -> Withdrawal {
        Withdrawal {
            id: Uuid::new_v4(),
            account_id: "alice".into(),
            currency: "ETH".into(),
            amount: Decimal::from(amount),
            fee: Decimal::from(fee),
            destination: "0xdest".into(),
            external_ref: None,
            status: WithdrawalStatus::Processing,
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_completion_changes_with_fee() {
        let w = withdrawal(10, 1);
        let changes = completion_changes(&w, Some("fees"));
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].kind, ChangeKind::ConsumeReserved);
        assert_eq!(changes[0].amount, Decimal::from(9));
        assert_eq!(changes[0].entry_type, EntryType::Withdrawal);
        assert_eq!(changes[1].amount, Decimal::from(1));
        assert_eq!(changes[1].entry_type, EntryType::Fee);
        assert_eq!(changes[2].account_id, "fees");
        assert_eq!(changes[2].kind, ChangeKind::Credit);
        // Reserved total consumed equals the gross amount
        let consumed: Decimal = changes
            .iter()
            .filter(|c| c.kind == ChangeKind::ConsumeReserved)
            .map(|c| c.amount)
            .sum();
        assert_eq!(consumed, w.amount);
    }

    #[test]
    fn test_completion_changes_without_fee() {
        let changes = completion_changes(&withdrawal(10, 0), Some("fees"));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].amount, Decimal::from(10));
    }

    #[test]
    fn test_fee_burned_without_fee_account() {
        let changes = completion_changes(&withdrawal(10, 2), None);
        assert_eq!(changes.len(), 2);
    }
}
