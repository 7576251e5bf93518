//! Withdrawal lifecycle: request, approval, settlement and release

pub mod coordinator;
pub mod models;
pub mod settlement;
pub mod state;
pub mod store;
pub mod worker;

pub use coordinator::{SettlementTimeouts, WithdrawalSettlementCoordinator};
pub use models::{NewWithdrawal, Withdrawal, completion_changes};
pub use settlement::{
    ManualSettlementClient, SettlementClient, SettlementError, SettlementStatus,
};
pub use state::WithdrawalStatus;
pub use store::WithdrawalStore;
pub use worker::{WithdrawalWorker, WorkerTick};
