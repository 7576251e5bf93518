//! Wallets and the transaction journal

pub mod models;
pub mod service;
pub mod store;

pub use models::{
    AccountStatus, BalanceChange, ChangeKind, EntryType, LedgerEntry, Reference, Wallet, WalletKey,
};
pub use service::{BalanceUpdate, WalletService};
pub use store::{AccountService, EntryFilter, EntryPage, LedgerJournal, Page, WalletStore};
