//! Ledger reconciliation: internal journal checks and external chain checks

pub mod engine;
pub mod report;
pub mod source;
pub mod worker;

pub use engine::ReconciliationEngine;
pub use report::{
    AssetStatus, CurrencySummary, Discrepancy, ExternalCheck, ReconciliationReport, ReportStatus,
};
pub use source::{LedgerSnapshot, ReconciliationSource, ReportStore};
pub use worker::{run_proof_of_reserves, run_reconciliation};
