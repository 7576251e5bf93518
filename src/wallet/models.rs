//! Wallet, journal entry and account types
//!
//! `Wallet` is the only place balance arithmetic happens. Both storage
//! backends load a wallet under lock, call one of its mutations, and write
//! the result back; they never touch the three balance fields directly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::LedgerError;

/// Balance of one currency held by one account
///
/// # Invariants (enforced by private fields):
/// - balance == available_balance + reserved_balance
/// - available_balance >= 0 and reserved_balance >= 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    account_id: String,
    currency: String,
    balance: Decimal,
    available_balance: Decimal,
    reserved_balance: Decimal,
    updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(account_id: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            currency: currency.into(),
            balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            reserved_balance: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Rebuild a wallet from stored columns, rejecting rows that break the invariant.
    pub fn from_parts(
        account_id: String,
        currency: String,
        balance: Decimal,
        available_balance: Decimal,
        reserved_balance: Decimal,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let wallet = Self {
            account_id,
            currency,
            balance,
            available_balance,
            reserved_balance,
            updated_at,
        };
        wallet.check_invariant()?;
        Ok(wallet)
    }

    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn available_balance(&self) -> Decimal {
        self.available_balance
    }

    pub fn reserved_balance(&self) -> Decimal {
        self.reserved_balance
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn key(&self) -> WalletKey {
        WalletKey::new(&self.account_id, &self.currency)
    }

    // ============================================================
    // VALIDATED MUTATIONS
    // ============================================================

    /// Move `amount` from available to reserved.
    pub fn reserve(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        require_positive(amount)?;
        if self.available_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: self.available_balance,
            });
        }
        self.available_balance -= amount;
        self.reserved_balance += amount;
        self.touch()
    }

    /// Move `amount` from reserved back to available. Never clamps.
    pub fn release(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        require_positive(amount)?;
        if self.reserved_balance < amount {
            return Err(LedgerError::InsufficientReserved {
                requested: amount,
                reserved: self.reserved_balance,
            });
        }
        self.reserved_balance -= amount;
        self.available_balance += amount;
        self.touch()
    }

    /// Apply a signed change to balance and available. Returns the new balance.
    pub fn apply_credit(&mut self, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::Validation("amount must not be zero".into()));
        }
        let available = self
            .available_balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Validation("amount overflows balance".into()))?;
        if available.is_sign_negative() {
            return Err(LedgerError::InsufficientBalance {
                requested: -amount,
                available: self.available_balance,
            });
        }
        self.available_balance = available;
        self.balance += amount;
        self.touch()?;
        Ok(self.balance)
    }

    /// Remove `amount` from reserved and from balance (settled outflow).
    /// Returns the new balance.
    pub fn consume_reserved(&mut self, amount: Decimal) -> Result<Decimal, LedgerError> {
        require_positive(amount)?;
        if self.reserved_balance < amount {
            return Err(LedgerError::InsufficientReserved {
                requested: amount,
                reserved: self.reserved_balance,
            });
        }
        self.reserved_balance -= amount;
        self.balance -= amount;
        self.touch()?;
        Ok(self.balance)
    }

    fn touch(&mut self) -> Result<(), LedgerError> {
        self.updated_at = Utc::now();
        self.check_invariant()
    }

    /// Non-negative splits that sum to the balance
    pub fn check_invariant(&self) -> Result<(), LedgerError> {
        if self.available_balance.is_sign_negative()
            || self.reserved_balance.is_sign_negative()
            || self.balance != self.available_balance + self.reserved_balance
        {
            return Err(LedgerError::Integrity(format!(
                "wallet {}/{} has balance {} != available {} + reserved {}",
                self.account_id,
                self.currency,
                self.balance,
                self.available_balance,
                self.reserved_balance
            )));
        }
        Ok(())
    }
}

fn require_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "amount must be greater than zero, got {}",
            amount
        )));
    }
    Ok(())
}

/// (account_id, currency), ordered lexicographically; this is the lock order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WalletKey {
    pub account_id: String,
    pub currency: String,
}

impl WalletKey {
    pub fn new(account_id: &str, currency: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            currency: currency.to_string(),
        }
    }
}

impl fmt::Display for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.currency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Deposit,
    Withdrawal,
    Trade,
    Fee,
    Adjustment,
    Reservation,
    Release,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::Withdrawal => "withdrawal",
            EntryType::Trade => "trade",
            EntryType::Fee => "fee",
            EntryType::Adjustment => "adjustment",
            EntryType::Reservation => "reservation",
            EntryType::Release => "release",
        }
    }

    /// Only entry types that move the total balance can be journaled.
    pub fn changes_balance(&self) -> bool {
        !matches!(self, EntryType::Reservation | EntryType::Release)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(EntryType::Deposit),
            "withdrawal" => Ok(EntryType::Withdrawal),
            "trade" => Ok(EntryType::Trade),
            "fee" => Ok(EntryType::Fee),
            "adjustment" => Ok(EntryType::Adjustment),
            "reservation" => Ok(EntryType::Reservation),
            "release" => Ok(EntryType::Release),
            other => Err(LedgerError::Validation(format!(
                "unknown entry type: {}",
                other
            ))),
        }
    }
}

/// What caused a journal entry (order id, deposit id, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    pub kind: String,
}

impl Reference {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

/// Immutable journal record of one balance change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub entry_type: EntryType,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// How a [`BalanceChange`] touches the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Signed change to balance and available
    Credit,
    /// Positive amount removed from reserved and balance
    ConsumeReserved,
}

/// One journaled balance mutation, applied inside a store transaction
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    pub account_id: String,
    pub currency: String,
    pub kind: ChangeKind,
    pub amount: Decimal,
    pub entry_type: EntryType,
    pub reference: Option<Reference>,
    pub description: String,
}

impl BalanceChange {
    pub fn credit(
        account_id: &str,
        currency: &str,
        amount: Decimal,
        entry_type: EntryType,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            currency: currency.to_string(),
            kind: ChangeKind::Credit,
            amount,
            entry_type,
            reference: None,
            description: String::new(),
        }
    }

    pub fn consume_reserved(
        account_id: &str,
        currency: &str,
        amount: Decimal,
        entry_type: EntryType,
    ) -> Self {
        Self {
            kind: ChangeKind::ConsumeReserved,
            ..Self::credit(account_id, currency, amount, entry_type)
        }
    }

    pub fn with_reference(mut self, reference: Option<Reference>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn key(&self) -> WalletKey {
        WalletKey::new(&self.account_id, &self.currency)
    }

    /// Apply to a locked wallet and build the journal entry for it.
    pub fn apply(&self, wallet: &mut Wallet) -> Result<LedgerEntry, LedgerError> {
        if !self.entry_type.changes_balance() {
            return Err(LedgerError::Validation(format!(
                "{} entries are not journaled",
                self.entry_type
            )));
        }
        let (amount, balance_after) = match self.kind {
            ChangeKind::Credit => (self.amount, wallet.apply_credit(self.amount)?),
            ChangeKind::ConsumeReserved => (-self.amount, wallet.consume_reserved(self.amount)?),
        };
        Ok(LedgerEntry {
            id: Uuid::new_v4(),
            account_id: self.account_id.clone(),
            currency: self.currency.clone(),
            amount,
            balance_after,
            entry_type: self.entry_type,
            reference_id: self.reference.as_ref().map(|r| r.id.clone()),
            reference_type: self.reference.as_ref().map(|r| r.kind.clone()),
            description: self.description.clone(),
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Restricted,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Restricted => "restricted",
            AccountStatus::Closed => "closed",
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "restricted" => Ok(AccountStatus::Restricted),
            "closed" => Ok(AccountStatus::Closed),
            other => Err(LedgerError::Validation(format!(
                "unknown account status: {}",
                other
            ))),
        }
    }
}
