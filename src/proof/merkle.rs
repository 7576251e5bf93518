//! SHA-256 Merkle tree with tagged inclusion proofs
//!
//! Adjacent nodes are paired left to right; a level with an odd count pairs
//! its last node with itself. Leaf preimages start with `0x00` and inner
//! node preimages with `0x01`, so neither can be passed off as the other.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::LedgerError;

pub type Hash = [u8; 32];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("Cannot build a Merkle tree without leaves")]
    EmptyTree,

    #[error("Leaf index {index} out of range ({count} leaves)")]
    IndexOutOfRange { index: usize, count: usize },
}

impl From<ProofError> for LedgerError {
    fn from(e: ProofError) -> Self {
        LedgerError::Validation(e.to_string())
    }
}

/// Which side of the running hash the sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Hex-encoded sibling hash
    pub hash: String,
    pub position: Position,
}

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

/// Canonical leaf over (account, currency, balance, nonce), each field
/// prefixed with its big-endian u64 byte length. The balance is normalized
/// so that `1.50` and `1.5` commit to the same leaf.
pub fn leaf_hash(account_id: &str, currency: &str, balance: Decimal, nonce: &str) -> Hash {
    let balance = balance.normalize().to_string();
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    for field in [account_id, currency, balance.as_str(), nonce] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize().into()
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// levels[0] = leaves, last = [root]
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn build(leaves: Vec<Hash>) -> Result<Self, ProofError> {
        if leaves.is_empty() {
            return Err(ProofError::EmptyTree);
        }
        let mut levels = vec![leaves];
        while let Some(level) = levels.last().filter(|l| l.len() > 1) {
            let next: Vec<Hash> = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }
        Ok(Self { levels })
    }

    pub fn root(&self) -> Hash {
        // build() guarantees a single-node top level
        self.levels[self.levels.len() - 1][0]
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Sibling path from the leaf at `index` up to (excluding) the root.
    pub fn proof(&self, index: usize) -> Result<Vec<ProofStep>, ProofError> {
        let count = self.leaf_count();
        if index >= count {
            return Err(ProofError::IndexOutOfRange { index, count });
        }
        let mut path = Vec::with_capacity(self.levels.len() - 1);
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling, position) = if idx % 2 == 0 {
                // Odd tail pairs with itself
                (level.get(idx + 1).unwrap_or(&level[idx]), Position::Right)
            } else {
                (&level[idx - 1], Position::Left)
            };
            path.push(ProofStep {
                hash: hex::encode(sibling),
                position,
            });
            idx /= 2;
        }
        Ok(path)
    }
}

fn decode_hash(s: &str) -> Option<Hash> {
    hex::decode(s).ok()?.try_into().ok()
}

/// Walk `path` from `leaf` and compare with the hex-encoded `root`.
pub fn verify_proof(leaf: Hash, path: &[ProofStep], root: &str) -> bool {
    let Some(root) = decode_hash(root) else {
        return false;
    };
    let mut current = leaf;
    for step in path {
        let Some(sibling) = decode_hash(&step.hash) else {
            return false;
        };
        current = match step.position {
            Position::Left => hash_pair(&sibling, &current),
            Position::Right => hash_pair(&current, &sibling),
        };
    }
    current == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n)
            .map(|i| leaf_hash(&format!("user{}", i), "BTC", Decimal::from(i as u64 + 1), "n"))
            .collect()
    }

    #[test]
    fn test_empty_tree_rejected() {
        assert_eq!(MerkleTree::build(vec![]).unwrap_err(), ProofError::EmptyTree);
    }

    #[test]
    fn test_single_leaf_is_root() {
        let l = leaves(1);
        let tree = MerkleTree::build(l.clone()).unwrap();
        assert_eq!(tree.root(), l[0]);
        assert!(tree.proof(0).unwrap().is_empty());
        assert!(verify_proof(l[0], &[], &tree.root_hex()));
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let l = leaves(3);
        let tree = MerkleTree::build(l.clone()).unwrap();
        let left = hash_pair(&l[0], &l[1]);
        let right = hash_pair(&l[2], &l[2]);
        assert_eq!(tree.root(), hash_pair(&left, &right));
    }

    #[test]
    fn test_deterministic_root() {
        let a = MerkleTree::build(leaves(7)).unwrap();
        let b = MerkleTree::build(leaves(7)).unwrap();
        assert_eq!(a.root(), b.root());
        assert_ne!(a.root(), MerkleTree::build(leaves(6)).unwrap().root());
    }

    #[test]
    fn test_every_leaf_verifies() {
        for n in [1, 2, 3, 4, 5, 8, 13] {
            let l = leaves(n);
            let tree = MerkleTree::build(l.clone()).unwrap();
            let root = tree.root_hex();
            for (i, leaf) in l.iter().enumerate() {
                let path = tree.proof(i).unwrap();
                assert!(verify_proof(*leaf, &path, &root), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_tampered_proof_fails() {
        let l = leaves(5);
        let tree = MerkleTree::build(l.clone()).unwrap();
        let root = tree.root_hex();
        let mut path = tree.proof(2).unwrap();

        // Wrong leaf
        assert!(!verify_proof(l[3], &path, &root));

        // Flipped sibling hash
        let original = path[0].hash.clone();
        path[0].hash = hex::encode([0u8; 32]);
        assert!(!verify_proof(l[2], &path, &root));
        path[0].hash = original;

        // Swapped side
        path[1].position = match path[1].position {
            Position::Left => Position::Right,
            Position::Right => Position::Left,
        };
        assert!(!verify_proof(l[2], &path, &root));

        assert!(!verify_proof(l[2], &tree.proof(2).unwrap(), "not-hex"));
    }

    #[test]
    fn test_leaf_ignores_trailing_zeros() {
        let a = leaf_hash("alice", "BTC", Decimal::new(150, 2), "n");
        let b = leaf_hash("alice", "BTC", Decimal::new(15, 1), "n");
        assert_eq!(a, b);
        assert_ne!(a, leaf_hash("alice", "BTC", Decimal::new(15, 1), "m"));
    }

    #[test]
    fn test_field_boundaries_are_committed() {
        let a = leaf_hash("alice:BTC", "1", Decimal::ONE, "n");
        let b = leaf_hash("alice", "BTC:1", Decimal::ONE, "n");
        assert_ne!(a, b);
    }

    #[test]
    fn test_leaf_and_node_domains_differ() {
        let l = leaves(2);
        let untagged: Hash = Sha256::new()
            .chain_update(l[0])
            .chain_update(l[1])
            .finalize()
            .into();
        assert_ne!(hash_pair(&l[0], &l[1]), untagged);

        // A leaf built from a node preimage never equals that node
        let node = hash_pair(&l[0], &l[1]);
        let forged = leaf_hash(&hex::encode(l[0]), &hex::encode(l[1]), Decimal::ZERO, "");
        assert_ne!(node, forged);
    }

    #[test]
    fn test_index_out_of_range() {
        let tree = MerkleTree::build(leaves(2)).unwrap();
        assert_eq!(
            tree.proof(2).unwrap_err(),
            ProofError::IndexOutOfRange { index: 2, count: 2 }
        );
    }
}
