//! In-memory backend
//!
//! One async mutex guards the whole state, so every trait method is a
//! serializable transaction. Mutations work on copies of the affected
//! wallets and only write them back once every step has succeeded.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::deposit::{
    ConfirmationUpdate, Deposit, DepositAddress, DepositStatus, DepositStore, NewDeposit,
};
use crate::error::LedgerError;
use crate::proof::ProofOfReservesReport;
use crate::reconciliation::{LedgerSnapshot, ReconciliationReport, ReconciliationSource, ReportStore};
use crate::wallet::{
    AccountService, AccountStatus, BalanceChange, EntryFilter, EntryPage, EntryType, LedgerEntry,
    LedgerJournal, Page, Reference, Wallet, WalletKey, WalletStore,
};
use crate::withdrawal::{
    NewWithdrawal, Withdrawal, WithdrawalStatus, WithdrawalStore, completion_changes,
};

#[derive(Default)]
struct State {
    accounts: BTreeMap<String, AccountStatus>,
    wallets: BTreeMap<WalletKey, Wallet>,
    /// Append order is creation order
    entries: Vec<LedgerEntry>,
    deposits: Vec<Deposit>,
    /// Keyed by (currency, address)
    addresses: BTreeMap<(String, String), DepositAddress>,
    withdrawals: Vec<Withdrawal>,
    reconciliation_reports: Vec<ReconciliationReport>,
    proof_reports: Vec<ProofOfReservesReport>,
}

impl State {
    fn wallet(&self, account_id: &str, currency: &str) -> Result<&Wallet, LedgerError> {
        self.wallets
            .get(&WalletKey::new(account_id, currency))
            .ok_or_else(|| LedgerError::wallet_not_found(account_id, currency))
    }

    /// Run `f` on a copy of one wallet; store it only if `f` succeeds.
    fn mutate_wallet<F>(&mut self, account_id: &str, currency: &str, f: F) -> Result<Wallet, LedgerError>
    where
        F: FnOnce(&mut Wallet) -> Result<(), LedgerError>,
    {
        let mut wallet = self.wallet(account_id, currency)?.clone();
        f(&mut wallet)?;
        self.wallets.insert(wallet.key(), wallet.clone());
        Ok(wallet)
    }

    /// Apply every change or none of them.
    fn apply_changes(&mut self, changes: &[BalanceChange]) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut working: BTreeMap<WalletKey, Wallet> = BTreeMap::new();
        for change in changes {
            let key = change.key();
            if !working.contains_key(&key) {
                let wallet = self.wallet(&key.account_id, &key.currency)?.clone();
                working.insert(key, wallet);
            }
        }

        let mut entries = Vec::with_capacity(changes.len());
        for change in changes {
            let wallet = working
                .get_mut(&change.key())
                .ok_or_else(|| LedgerError::Internal("wallet missing from batch".into()))?;
            entries.push(change.apply(wallet)?);
        }

        self.wallets.extend(working);
        self.entries.extend(entries.iter().cloned());
        Ok(entries)
    }

    fn deposit_mut(&mut self, id: Uuid) -> Result<&mut Deposit, LedgerError> {
        self.deposits
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(LedgerError::DepositNotFound(id))
    }

    fn withdrawal_mut(&mut self, id: Uuid) -> Result<&mut Withdrawal, LedgerError> {
        self.withdrawals
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or(LedgerError::WithdrawalNotFound(id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift a wallet's balance without a journal entry, to exercise reconciliation.
    #[cfg(any(test, feature = "mock-api"))]
    pub async fn corrupt_balance(&self, account_id: &str, currency: &str, delta: Decimal) {
        let mut state = self.state.lock().await;
        let key = WalletKey::new(account_id, currency);
        if let Some(w) = state.wallets.get(&key) {
            if let Ok(corrupted) = Wallet::from_parts(
                w.account_id().to_string(),
                w.currency().to_string(),
                w.balance() + delta,
                w.available_balance() + delta,
                w.reserved_balance(),
                w.updated_at(),
            ) {
                state.wallets.insert(key, corrupted);
            }
        }
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn open_account(&self, account_id: &str, currencies: &[String]) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state
            .accounts
            .entry(account_id.to_string())
            .or_insert(AccountStatus::Active);
        for currency in currencies {
            state
                .wallets
                .entry(WalletKey::new(account_id, currency))
                .or_insert_with(|| Wallet::new(account_id, currency.as_str()));
        }
        Ok(())
    }

    async fn set_account_status(&self, account_id: &str, status: AccountStatus) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let slot = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        *slot = status;
        Ok(())
    }

    async fn get_wallet(&self, account_id: &str, currency: &str) -> Result<Wallet, LedgerError> {
        let state = self.state.lock().await;
        state.wallet(account_id, currency).cloned()
    }

    async fn list_wallets(&self, account_id: &str) -> Result<Vec<Wallet>, LedgerError> {
        let state = self.state.lock().await;
        if !state.accounts.contains_key(account_id) {
            return Err(LedgerError::AccountNotFound(account_id.to_string()));
        }
        Ok(state
            .wallets
            .values()
            .filter(|w| w.account_id() == account_id)
            .cloned()
            .collect())
    }

    async fn reserve(&self, account_id: &str, currency: &str, amount: Decimal) -> Result<Wallet, LedgerError> {
        let mut state = self.state.lock().await;
        state.mutate_wallet(account_id, currency, |w| w.reserve(amount))
    }

    async fn release(&self, account_id: &str, currency: &str, amount: Decimal) -> Result<Wallet, LedgerError> {
        let mut state = self.state.lock().await;
        state.mutate_wallet(account_id, currency, |w| w.release(amount))
    }

    async fn apply_batch(&self, changes: Vec<BalanceChange>) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut state = self.state.lock().await;
        state.apply_changes(&changes)
    }
}

#[async_trait]
impl AccountService for MemoryStore {
    async fn account_status(&self, account_id: &str) -> Result<AccountStatus, LedgerError> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(account_id)
            .copied()
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }
}

#[async_trait]
impl LedgerJournal for MemoryStore {
    async fn list_entries(
        &self,
        account_id: &str,
        filter: &EntryFilter,
        page: Page,
    ) -> Result<EntryPage, LedgerError> {
        let state = self.state.lock().await;
        let mut entries: Vec<LedgerEntry> = state
            .entries
            .iter()
            .rev()
            .filter(|e| e.account_id == account_id && filter.matches(e))
            .skip(page.offset as usize)
            .take(page.limit as usize + 1)
            .cloned()
            .collect();
        let has_more = entries.len() > page.limit as usize;
        entries.truncate(page.limit as usize);
        Ok(EntryPage {
            entries,
            limit: page.limit,
            offset: page.offset,
            has_more,
        })
    }
}

#[async_trait]
impl DepositStore for MemoryStore {
    async fn record_deposit(&self, deposit: NewDeposit, required_confirmations: u64) -> Result<Deposit, LedgerError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .deposits
            .iter()
            .find(|d| d.currency == deposit.currency && d.txid == deposit.txid)
        {
            return Ok(existing.clone());
        }
        state.wallet(&deposit.account_id, &deposit.currency)?;

        let now = Utc::now();
        let stored = Deposit {
            id: Uuid::new_v4(),
            account_id: deposit.account_id,
            currency: deposit.currency,
            amount: deposit.amount,
            address: deposit.address,
            txid: deposit.txid,
            confirmations: deposit.confirmations,
            required_confirmations,
            status: DepositStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            credited_at: None,
        };
        state.deposits.push(stored.clone());
        Ok(stored)
    }

    async fn get_deposit(&self, id: Uuid) -> Result<Deposit, LedgerError> {
        let state = self.state.lock().await;
        state
            .deposits
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or(LedgerError::DepositNotFound(id))
    }

    async fn list_deposits(&self, account_id: &str, limit: u32) -> Result<Vec<Deposit>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .iter()
            .rev()
            .filter(|d| d.account_id == account_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_active_deposits(&self, currencies: &[String], limit: usize) -> Result<Vec<Deposit>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .iter()
            .filter(|d| !d.status.is_terminal() && currencies.contains(&d.currency))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_confirmations(&self, id: Uuid, confirmations: u64) -> Result<ConfirmationUpdate, LedgerError> {
        let mut state = self.state.lock().await;
        let deposit = state.deposit_mut(id)?;
        match deposit.status {
            DepositStatus::Credited | DepositStatus::Failed => Ok(ConfirmationUpdate::Terminal),
            DepositStatus::Confirmed => {
                deposit.confirmations = deposit.confirmations.max(confirmations);
                deposit.updated_at = Utc::now();
                Ok(ConfirmationUpdate::AlreadyConfirmed)
            }
            DepositStatus::Pending => {
                deposit.confirmations = deposit.confirmations.max(confirmations);
                deposit.updated_at = Utc::now();
                if deposit.threshold_met() {
                    deposit.status = DepositStatus::Confirmed;
                    Ok(ConfirmationUpdate::Confirmed)
                } else {
                    Ok(ConfirmationUpdate::Waiting)
                }
            }
        }
    }

    async fn credit_deposit(&self, id: Uuid) -> Result<Option<LedgerEntry>, LedgerError> {
        let mut state = self.state.lock().await;
        let deposit = state.deposit_mut(id)?.clone();
        if !deposit.status.can_transition_to(DepositStatus::Credited) {
            return Ok(None);
        }

        let change = BalanceChange::credit(
            &deposit.account_id,
            &deposit.currency,
            deposit.amount,
            EntryType::Deposit,
        )
        .with_reference(Some(Reference::new("deposit", deposit.id.to_string())))
        .with_description(format!("deposit {}", deposit.txid));
        let mut entries = state.apply_changes(std::slice::from_ref(&change))?;

        let now = Utc::now();
        let row = state.deposit_mut(id)?;
        row.status = DepositStatus::Credited;
        row.credited_at = Some(now);
        row.updated_at = now;
        Ok(entries.pop())
    }

    async fn fail_deposit(&self, id: Uuid, reason: &str) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        let deposit = state.deposit_mut(id)?;
        if !deposit.status.can_transition_to(DepositStatus::Failed) {
            return Ok(false);
        }
        deposit.status = DepositStatus::Failed;
        deposit.failure_reason = Some(reason.to_string());
        deposit.updated_at = Utc::now();
        Ok(true)
    }

    async fn register_address(&self, address: DepositAddress) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let key = (address.currency.clone(), address.address.clone());
        if let Some(existing) = state.addresses.get(&key) {
            if existing.account_id != address.account_id {
                return Err(LedgerError::Validation(format!(
                    "address {} already belongs to another account",
                    address.address
                )));
            }
            return Ok(());
        }
        state.wallet(&address.account_id, &address.currency)?;
        state.addresses.insert(key, address);
        Ok(())
    }

    async fn deposit_addresses(&self, currency: &str) -> Result<Vec<DepositAddress>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .addresses
            .values()
            .filter(|a| a.currency == currency)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn create_withdrawal(&self, request: NewWithdrawal) -> Result<Withdrawal, LedgerError> {
        let mut state = self.state.lock().await;
        state.mutate_wallet(&request.account_id, &request.currency, |w| w.reserve(request.amount))?;

        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            account_id: request.account_id,
            currency: request.currency,
            amount: request.amount,
            fee: request.fee,
            destination: request.destination,
            external_ref: None,
            status: WithdrawalStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.withdrawals.push(withdrawal.clone());
        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        let state = self.state.lock().await;
        state
            .withdrawals
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or(LedgerError::WithdrawalNotFound(id))
    }

    async fn list_withdrawals(&self, status: WithdrawalStatus, limit: usize) -> Result<Vec<Withdrawal>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .iter()
            .filter(|w| w.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn transition_withdrawal(
        &self,
        id: Uuid,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    ) -> Result<bool, LedgerError> {
        if !from.can_transition_to(to) {
            return Err(LedgerError::InvalidStateTransition(format!("{} -> {}", from, to)));
        }
        let mut state = self.state.lock().await;
        let withdrawal = state.withdrawal_mut(id)?;
        if withdrawal.status != from {
            return Ok(false);
        }
        withdrawal.status = to;
        withdrawal.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_external_ref(&self, id: Uuid, external_ref: &str) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        let withdrawal = state.withdrawal_mut(id)?;
        if withdrawal.status != WithdrawalStatus::Processing {
            return Ok(false);
        }
        withdrawal.external_ref = Some(external_ref.to_string());
        withdrawal.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail_withdrawal(&self, id: Uuid, reason: &str) -> Result<Option<Withdrawal>, LedgerError> {
        let mut state = self.state.lock().await;
        let current = state.withdrawal_mut(id)?.clone();
        if !WithdrawalStatus::FAILABLE.contains(&current.status) {
            return Ok(None);
        }
        state.mutate_wallet(&current.account_id, &current.currency, |w| w.release(current.amount))?;

        let row = state.withdrawal_mut(id)?;
        row.status = WithdrawalStatus::Failed;
        row.failure_reason = Some(reason.to_string());
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn complete_withdrawal(
        &self,
        id: Uuid,
        fee_account: Option<&str>,
    ) -> Result<Option<Vec<LedgerEntry>>, LedgerError> {
        let mut state = self.state.lock().await;
        let current = state.withdrawal_mut(id)?.clone();
        if current.status != WithdrawalStatus::Processing {
            return Ok(None);
        }
        let entries = state.apply_changes(&completion_changes(&current, fee_account))?;

        let row = state.withdrawal_mut(id)?;
        row.status = WithdrawalStatus::Completed;
        row.updated_at = Utc::now();
        Ok(Some(entries))
    }
}

#[async_trait]
impl ReconciliationSource for MemoryStore {
    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let state = self.state.lock().await;
        let mut ledger_sums: BTreeMap<WalletKey, Decimal> = BTreeMap::new();
        for entry in &state.entries {
            *ledger_sums
                .entry(WalletKey::new(&entry.account_id, &entry.currency))
                .or_default() += entry.amount;
        }
        Ok(LedgerSnapshot {
            wallets: state.wallets.values().cloned().collect(),
            ledger_sums,
            addresses: state.addresses.values().cloned().collect(),
            taken_at: Some(Utc::now()),
        })
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn save_reconciliation(&self, report: &ReconciliationReport) -> Result<(), LedgerError> {
        self.state.lock().await.reconciliation_reports.push(report.clone());
        Ok(())
    }

    async fn latest_reconciliation(&self) -> Result<Option<ReconciliationReport>, LedgerError> {
        Ok(self.state.lock().await.reconciliation_reports.last().cloned())
    }

    async fn save_proof_of_reserves(&self, report: &ProofOfReservesReport) -> Result<(), LedgerError> {
        self.state.lock().await.proof_reports.push(report.clone());
        Ok(())
    }

    async fn latest_proof_of_reserves(&self) -> Result<Option<ProofOfReservesReport>, LedgerError> {
        Ok(self.state.lock().await.proof_reports.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::Arc;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn store_with(account: &str, balance: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .open_account(account, &["BTC".to_string(), "USD".to_string()])
            .await
            .unwrap();
        store
            .credit(BalanceChange::credit(account, "USD", d(balance), EntryType::Deposit))
            .await
            .unwrap();
        store
    }

    fn split(w: &Wallet) -> (Decimal, Decimal, Decimal) {
        (w.balance(), w.available_balance(), w.reserved_balance())
    }

    #[tokio::test]
    async fn test_reserve_release_credit_scenario() {
        let store = store_with("alice", "100").await;
        let w = store.reserve("alice", "USD", d("50")).await.unwrap();
        assert_eq!(split(&w), (d("100"), d("50"), d("50")));
        let w = store.release("alice", "USD", d("20")).await.unwrap();
        assert_eq!(split(&w), (d("100"), d("70"), d("30")));
        let entry = store
            .credit(BalanceChange::credit("alice", "USD", d("-30"), EntryType::Adjustment))
            .await
            .unwrap();
        assert_eq!(entry.balance_after, d("70"));
        let w = store.get_wallet("alice", "USD").await.unwrap();
        assert_eq!(split(&w), (d("70"), d("40"), d("30")));

        // Only balance-changing operations are journaled
        let page = store
            .list_entries("alice", &EntryFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].entry_type, EntryType::Adjustment);
    }

    #[tokio::test]
    async fn test_failed_reserve_leaves_wallet_unchanged() {
        let store = store_with("alice", "100").await;
        let err = store.reserve("alice", "USD", d("100.01")).await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        let w = store.get_wallet("alice", "USD").await.unwrap();
        assert_eq!(split(&w), (d("100"), d("100"), d("0")));

        let err = store.release("alice", "USD", d("1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientReserved { .. }));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = store_with("alice", "100").await;
        store.open_account("bob", &["USD".to_string()]).await.unwrap();
        let changes = vec![
            BalanceChange::credit("bob", "USD", d("60"), EntryType::Trade),
            BalanceChange::credit("alice", "USD", d("-60"), EntryType::Trade),
            // Overdraws alice
            BalanceChange::credit("alice", "USD", d("-60"), EntryType::Trade),
        ];
        assert!(store.apply_batch(changes).await.is_err());
        assert_eq!(store.get_wallet("bob", "USD").await.unwrap().balance(), Decimal::ZERO);
        assert_eq!(store.get_wallet("alice", "USD").await.unwrap().balance(), d("100"));
        let page = store
            .list_entries("bob", &EntryFilter::default(), Page::default())
            .await
            .unwrap();
        assert!(page.entries.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_wallet_and_account() {
        let store = store_with("alice", "1").await;
        let err = store.get_wallet("alice", "EUR").await.unwrap_err();
        assert_eq!(err.code(), "WALLET_NOT_FOUND");
        let err = store.list_wallets("nobody").await.unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_NOT_FOUND");
        let err = store
            .credit(BalanceChange::credit("nobody", "USD", d("1"), EntryType::Deposit))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WALLET_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let store = store_with("alice", "10").await;
        store
            .open_account("alice", &["BTC".to_string(), "USD".to_string(), "ETH".to_string()])
            .await
            .unwrap();
        let wallets = store.list_wallets("alice").await.unwrap();
        assert_eq!(wallets.len(), 3);
        assert_eq!(store.get_wallet("alice", "USD").await.unwrap().balance(), d("10"));
    }

    #[tokio::test]
    async fn test_entry_pagination_newest_first() {
        let store = store_with("alice", "1").await;
        for i in 2..=5 {
            store
                .credit(BalanceChange::credit("alice", "USD", Decimal::from(i), EntryType::Deposit))
                .await
                .unwrap();
        }
        let first = store
            .list_entries("alice", &EntryFilter::default(), Page::new(Some(2), None))
            .await
            .unwrap();
        assert!(first.has_more);
        assert_eq!(first.entries[0].amount, d("5"));
        assert_eq!(first.entries[1].amount, d("4"));

        let last = store
            .list_entries("alice", &EntryFilter::default(), Page::new(Some(2), Some(4)))
            .await
            .unwrap();
        assert!(!last.has_more);
        assert_eq!(last.entries.len(), 1);
        assert_eq!(last.entries[0].amount, d("1"));
    }

    #[tokio::test]
    async fn test_concurrent_credits_keep_ledger_in_step() {
        let store = Arc::new(store_with("alice", "0.5").await);
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let amount = if i % 2 == 0 { d("1") } else { d("-0.5") };
                let _ = store
                    .credit(BalanceChange::credit("alice", "USD", amount, EntryType::Trade))
                    .await;
                let _ = store.reserve("alice", "USD", d("0.25")).await;
                let _ = store.release("alice", "USD", d("0.25")).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let snapshot = store.snapshot().await.unwrap();
        for wallet in &snapshot.wallets {
            assert_eq!(
                wallet.balance(),
                wallet.available_balance() + wallet.reserved_balance()
            );
            let ledger = snapshot
                .ledger_sums
                .get(&wallet.key())
                .copied()
                .unwrap_or_default();
            assert_eq!(wallet.balance(), ledger);
        }
    }

    #[tokio::test]
    async fn test_address_owned_by_one_account() {
        let store = store_with("alice", "1").await;
        store.open_account("bob", &["BTC".to_string()]).await.unwrap();
        let address = |account: &str| DepositAddress {
            account_id: account.into(),
            currency: "BTC".into(),
            address: "bc1shared".into(),
        };
        store.register_address(address("alice")).await.unwrap();
        store.register_address(address("alice")).await.unwrap();
        assert!(store.register_address(address("bob")).await.is_err());
        assert_eq!(store.deposit_addresses("BTC").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmations_never_move_backwards() {
        let store = store_with("alice", "1").await;
        let deposit = store
            .record_deposit(
                NewDeposit {
                    account_id: "alice".into(),
                    currency: "BTC".into(),
                    amount: d("0.5"),
                    address: "bc1qalice".into(),
                    txid: "tx-reorg".into(),
                    confirmations: 0,
                },
                6,
            )
            .await
            .unwrap();

        for (seen, expected) in [(2, 2), (4, 4), (1, 4)] {
            let update = store.record_confirmations(deposit.id, seen).await.unwrap();
            assert_eq!(update, ConfirmationUpdate::Waiting);
            assert_eq!(store.get_deposit(deposit.id).await.unwrap().confirmations, expected);
        }

        let update = store.record_confirmations(deposit.id, 6).await.unwrap();
        assert_eq!(update, ConfirmationUpdate::Confirmed);
        store.record_confirmations(deposit.id, 3).await.unwrap();
        assert_eq!(store.get_deposit(deposit.id).await.unwrap().confirmations, 6);
    }
}
