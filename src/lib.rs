//! Exchange Ledger - accounting core for a crypto/fiat exchange
//!
//! # Modules
//!
//! - [`wallet`] - Wallets, balance changes and the append-only journal
//! - [`reservation`] - Holds for open orders and withdrawals, trade settlement
//! - [`deposit`] - Deposit detection, confirmation tracking and idempotent crediting
//! - [`withdrawal`] - Withdrawal lifecycle and settlement worker
//! - [`banking`] - Fiat settlement events from the payment provider
//! - [`reconciliation`] - Internal and on-chain balance reconciliation
//! - [`proof`] - Merkle proof of reserves
//! - [`storage`] - PostgreSQL and in-memory backends
//! - [`gateway`] - Internal HTTP API

// Foundation
pub mod config;
pub mod error;
pub mod logging;
pub mod money;
pub mod retry;

// Persistence
pub mod db;
pub mod storage;

// Ledger core
pub mod reservation;
pub mod wallet;

// Money movement
pub mod banking;
pub mod chain;
pub mod deposit;
pub mod withdrawal;

// Audit
pub mod proof;
pub mod reconciliation;

// HTTP API
pub mod gateway;

pub use error::LedgerError;
pub use money::{AssetKind, CurrencyRegistry, CurrencySpec};
pub use wallet::{LedgerEntry, Wallet, WalletService};
