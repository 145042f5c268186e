//! Per-switch transactions and their correlation into flow operations.

mod tracker;
mod types;

pub use tracker::{TrackerError, TransactionTracker};
pub use types::{Completion, CompletionOutcome, OperationId, Transaction, TransactionStatus};
