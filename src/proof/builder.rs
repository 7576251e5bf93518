//! Proof-of-reserves reports
//!
//! Each run commits every positive user balance to a Merkle root under a
//! fresh nonce, and sets liabilities against the chain balances observed by
//! the latest reconciliation.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::merkle::{MerkleTree, ProofStep, leaf_hash, verify_proof};
use crate::error::LedgerError;
use crate::reconciliation::{ReconciliationSource, ReportStore};
use crate::wallet::WalletKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyReserves {
    pub currency: String,
    /// Sum of user balances
    pub liabilities: Decimal,
    /// Chain balance from the latest reconciliation, when known
    pub reserves: Option<Decimal>,
    /// reserves / liabilities
    pub coverage_ratio: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofOfReservesReport {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub merkle_root: String,
    pub nonce: String,
    pub leaf_count: usize,
    pub total_users: usize,
    pub currencies: Vec<CurrencyReserves>,
    /// Reconciliation report the reserves were taken from
    pub reconciliation_id: Option<Uuid>,
    /// Every currency with known reserves has coverage >= 1
    pub fully_backed: bool,
}

/// Everything a user needs to check their balance against a published root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub report_id: Uuid,
    pub account_id: String,
    pub currency: String,
    pub balance: Decimal,
    pub nonce: String,
    pub merkle_root: String,
    pub leaf_index: usize,
    pub path: Vec<ProofStep>,
}

struct PublishedTree {
    report_id: Uuid,
    nonce: String,
    tree: MerkleTree,
    leaves: HashMap<WalletKey, (usize, Decimal)>,
}

pub struct ProofOfReservesBuilder {
    source: Arc<dyn ReconciliationSource>,
    reports: Arc<dyn ReportStore>,
    published: RwLock<Option<PublishedTree>>,
}

fn new_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl ProofOfReservesBuilder {
    pub fn new(source: Arc<dyn ReconciliationSource>, reports: Arc<dyn ReportStore>) -> Self {
        Self {
            source,
            reports,
            published: RwLock::new(None),
        }
    }

    pub async fn run(&self) -> Result<ProofOfReservesReport, LedgerError> {
        let snapshot = self.source.snapshot().await?;

        let mut balances: Vec<(WalletKey, Decimal)> = snapshot
            .wallets
            .iter()
            .filter(|w| w.balance() > Decimal::ZERO)
            .map(|w| (w.key(), w.balance()))
            .collect();
        balances.sort_by(|a, b| a.0.cmp(&b.0));
        if balances.is_empty() {
            return Err(LedgerError::Validation(
                "no positive balances to commit".into(),
            ));
        }

        let nonce = new_nonce();
        let hashes = balances
            .iter()
            .map(|(key, balance)| leaf_hash(&key.account_id, &key.currency, *balance, &nonce))
            .collect();
        let tree = MerkleTree::build(hashes)?;

        let mut liabilities: BTreeMap<&str, Decimal> = BTreeMap::new();
        for (key, balance) in &balances {
            *liabilities.entry(key.currency.as_str()).or_default() += *balance;
        }
        let users: HashSet<&str> = balances.iter().map(|(k, _)| k.account_id.as_str()).collect();

        let reconciliation = self.reports.latest_reconciliation().await?;
        let reserves: HashMap<&str, Decimal> = reconciliation
            .as_ref()
            .map(|r| r.chain_totals().collect())
            .unwrap_or_default();

        let currencies: Vec<CurrencyReserves> = liabilities
            .iter()
            .map(|(currency, liabilities)| {
                let reserves = reserves.get(currency).copied();
                CurrencyReserves {
                    currency: currency.to_string(),
                    liabilities: *liabilities,
                    reserves,
                    coverage_ratio: reserves.map(|r| (r / *liabilities).round_dp(8)),
                }
            })
            .collect();
        let fully_backed = currencies
            .iter()
            .filter_map(|c| c.coverage_ratio)
            .all(|ratio| ratio >= Decimal::ONE);

        let report = ProofOfReservesReport {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            merkle_root: tree.root_hex(),
            nonce: nonce.clone(),
            leaf_count: tree.leaf_count(),
            total_users: users.len(),
            currencies,
            reconciliation_id: reconciliation.as_ref().map(|r| r.id),
            fully_backed,
        };
        self.reports.save_proof_of_reserves(&report).await?;

        let leaves = balances
            .into_iter()
            .enumerate()
            .map(|(i, (key, balance))| (key, (i, balance)))
            .collect();
        *self.published.write().await = Some(PublishedTree {
            report_id: report.id,
            nonce,
            tree,
            leaves,
        });

        info!(
            report_id = %report.id,
            merkle_root = %report.merkle_root,
            leaf_count = report.leaf_count,
            total_users = report.total_users,
            fully_backed = report.fully_backed,
            "Proof of reserves published"
        );
        Ok(report)
    }

    pub async fn latest(&self) -> Result<Option<ProofOfReservesReport>, LedgerError> {
        self.reports.latest_proof_of_reserves().await
    }

    /// Inclusion proof against the tree published by this process.
    pub async fn inclusion_proof(
        &self,
        account_id: &str,
        currency: &str,
    ) -> Result<InclusionProof, LedgerError> {
        let not_found = || LedgerError::ProofNotFound {
            account_id: account_id.to_string(),
            currency: currency.to_string(),
        };
        let published = self.published.read().await;
        let published = published.as_ref().ok_or_else(not_found)?;
        let (index, balance) = *published
            .leaves
            .get(&WalletKey::new(account_id, currency))
            .ok_or_else(not_found)?;
        Ok(InclusionProof {
            report_id: published.report_id,
            account_id: account_id.to_string(),
            currency: currency.to_string(),
            balance,
            nonce: published.nonce.clone(),
            merkle_root: published.tree.root_hex(),
            leaf_index: index,
            path: published.tree.proof(index)?,
        })
    }
}

/// Recompute the leaf and walk the sibling path; true iff it reaches `root`.
pub fn verify_inclusion(
    account_id: &str,
    currency: &str,
    balance: Decimal,
    nonce: &str,
    root: &str,
    path: &[ProofStep],
) -> bool {
    verify_proof(leaf_hash(account_id, currency, balance, nonce), path, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{AssetKind, CurrencyRegistry, CurrencySpec};
    use crate::storage::memory::MemoryStore;
    use crate::wallet::{BalanceChange, EntryType, WalletStore};

    async fn seeded() -> Arc<MemoryStore> {
        let registry = CurrencyRegistry::new([
            CurrencySpec {
                code: "BTC".into(),
                decimals: 8,
                kind: AssetKind::Crypto,
                required_confirmations: 6,
            },
            CurrencySpec {
                code: "USD".into(),
                decimals: 2,
                kind: AssetKind::Fiat,
                required_confirmations: 0,
            },
        ]);
        let store = Arc::new(MemoryStore::new());
        for (account, btc, usd) in [("alice", "1.5", "100"), ("bob", "0.25", "0"), ("carol", "0", "0")] {
            store.open_account(account, &registry.codes()).await.unwrap();
            for (currency, amount) in [("BTC", btc), ("USD", usd)] {
                let amount: Decimal = amount.parse().unwrap();
                if !amount.is_zero() {
                    store
                        .credit(BalanceChange::credit(account, currency, amount, EntryType::Deposit))
                        .await
                        .unwrap();
                }
            }
        }
        store
    }

    #[tokio::test]
    async fn test_report_commits_positive_balances() {
        let store = seeded().await;
        let builder = ProofOfReservesBuilder::new(store.clone(), store.clone());
        let report = builder.run().await.unwrap();

        assert_eq!(report.leaf_count, 3);
        assert_eq!(report.total_users, 2);
        assert_eq!(report.nonce.len(), 64);
        let btc = report.currencies.iter().find(|c| c.currency == "BTC").unwrap();
        assert_eq!(btc.liabilities, Decimal::new(175, 2));
        assert_eq!(btc.reserves, None);
        assert!(report.fully_backed);
        assert_eq!(builder.latest().await.unwrap(), Some(report));
    }

    #[tokio::test]
    async fn test_inclusion_proof_verifies() {
        let store = seeded().await;
        let builder = ProofOfReservesBuilder::new(store.clone(), store.clone());
        let report = builder.run().await.unwrap();

        let proof = builder.inclusion_proof("alice", "BTC").await.unwrap();
        assert_eq!(proof.merkle_root, report.merkle_root);
        assert!(verify_inclusion(
            "alice",
            "BTC",
            proof.balance,
            &proof.nonce,
            &report.merkle_root,
            &proof.path
        ));
        // Altered amount
        assert!(!verify_inclusion(
            "alice",
            "BTC",
            Decimal::new(16, 1),
            &proof.nonce,
            &report.merkle_root,
            &proof.path
        ));
        // Zero balances are not committed
        let err = builder.inclusion_proof("carol", "BTC").await.unwrap_err();
        assert_eq!(err.code(), "PROOF_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_each_run_uses_fresh_nonce() {
        let store = seeded().await;
        let builder = ProofOfReservesBuilder::new(store.clone(), store.clone());
        let a = builder.run().await.unwrap();
        let b = builder.run().await.unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.merkle_root, b.merkle_root);
    }

    #[tokio::test]
    async fn test_empty_ledger_rejected() {
        let store = Arc::new(MemoryStore::new());
        let builder = ProofOfReservesBuilder::new(store.clone(), store.clone());
        assert!(builder.run().await.is_err());
        assert!(builder.inclusion_proof("alice", "BTC").await.is_err());
    }
}
