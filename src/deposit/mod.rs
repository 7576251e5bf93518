//! Deposit detection, confirmation tracking and crediting

pub mod coordinator;
pub mod models;
pub mod poller;
pub mod state;
pub mod store;

pub use coordinator::{DepositCreditCoordinator, DepositOutcome, PollSummary};
pub use models::{ConfirmationUpdate, Deposit, DepositAddress, NewDeposit};
pub use poller::DepositPoller;
pub use state::DepositStatus;
pub use store::DepositStore;
