//! In-process chain used in development mode and tests

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{ChainClient, ChainError};

#[derive(Debug, Default)]
struct MockChainState {
    confirmations: HashMap<String, u64>,
    balances: HashMap<String, Decimal>,
    failing_addresses: HashSet<String>,
    failing_txids: HashSet<String>,
    unavailable: bool,
}

#[derive(Debug, Default)]
pub struct MockChainClient {
    state: Mutex<MockChainState>,
    confirmation_calls: AtomicUsize,
    balance_calls: AtomicUsize,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_confirmations(&self, txid: &str, confirmations: u64) {
        self.state()
            .confirmations
            .insert(txid.to_string(), confirmations);
    }

    pub fn set_balance(&self, address: &str, balance: Decimal) {
        self.state().balances.insert(address.to_string(), balance);
    }

    /// Make balance queries for `address` fail
    pub fn fail_address(&self, address: &str) {
        self.state().failing_addresses.insert(address.to_string());
    }

    /// Make confirmation queries for `txid` fail transiently
    pub fn fail_txid(&self, txid: &str) {
        self.state().failing_txids.insert(txid.to_string());
    }

    pub fn heal_txid(&self, txid: &str) {
        self.state().failing_txids.remove(txid);
    }

    /// Fail every call
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn confirmation_calls(&self) -> usize {
        self.confirmation_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_confirmations(&self, txid: &str) -> Result<u64, ChainError> {
        self.confirmation_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.unavailable || state.failing_txids.contains(txid) {
            return Err(ChainError::Connection("mock chain unavailable".into()));
        }
        Ok(state.confirmations.get(txid).copied().unwrap_or(0))
    }

    async fn get_address_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.unavailable || state.failing_addresses.contains(address) {
            return Err(ChainError::Connection("mock chain unavailable".into()));
        }
        Ok(state.balances.get(address).copied().unwrap_or(Decimal::ZERO))
    }
}
