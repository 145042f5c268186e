//! Transaction records and completion events.

use flow_types::{CommandKind, SwitchId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one flow operation within a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Acked,
    Failed,
    TimedOut,
    /// Still pending when a sibling failed.
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// One switch command and the state of its acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub switch_id: SwitchId,
    pub flow_id: String,
    pub kind: CommandKind,
    pub status: TransactionStatus,
}

impl Transaction {
    /// Creates a pending transaction with a fresh id.
    pub fn new(flow_id: impl Into<String>, switch_id: SwitchId, kind: CommandKind) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            switch_id,
            flow_id: flow_id.into(),
            kind,
            status: TransactionStatus::Pending,
        }
    }
}

/// How an operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Every transaction acked.
    Committed,
    /// A switch rejected its command.
    Failed { switches: Vec<SwitchId>, cause: String },
    /// The deadline passed with acks outstanding.
    TimedOut { switches: Vec<SwitchId> },
}

/// Emitted once per operation, when it reaches a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub flow_id: String,
    pub operation_id: OperationId,
    pub outcome: CompletionOutcome,
    /// Final state of every transaction of the operation.
    pub transactions: Vec<Transaction>,
}

impl Completion {
    pub fn is_committed(&self) -> bool {
        matches!(self.outcome, CompletionOutcome::Committed)
    }

    /// Transactions that were acked before the operation ended.
    pub fn acked(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Acked)
    }
}
