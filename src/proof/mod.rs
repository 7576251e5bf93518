//! Proof of reserves: Merkle commitment over user balances

pub mod builder;
pub mod merkle;

pub use builder::{
    CurrencyReserves, InclusionProof, ProofOfReservesBuilder, ProofOfReservesReport,
    verify_inclusion,
};
pub use merkle::{MerkleTree, Position, ProofError, ProofStep};
