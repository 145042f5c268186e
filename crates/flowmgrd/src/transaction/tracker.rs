//! Correlates switch acknowledgements with open flow operations.

use super::types::{Completion, CompletionOutcome, OperationId, Transaction, TransactionStatus};
use flow_types::SwitchId;
use log::{debug, warn};
use std::collections::HashMap;
use tokio::time::Instant;
use uuid::Uuid;

/// Error type for TransactionTracker operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("flow {flow_id} already has open operation {operation_id}")]
    AlreadyOpen {
        flow_id: String,
        operation_id: OperationId,
    },

    #[error("operation {operation_id} for flow {flow_id} has no transactions")]
    Empty {
        flow_id: String,
        operation_id: OperationId,
    },
}

#[derive(Debug)]
struct OpenOperation {
    operation_id: OperationId,
    transactions: Vec<Transaction>,
    deadline: Instant,
}

impl OpenOperation {
    fn pending_switches(&self) -> Vec<SwitchId> {
        let mut switches: Vec<SwitchId> = self
            .transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Pending)
            .map(|t| t.switch_id.clone())
            .collect();
        switches.sort();
        switches.dedup();
        switches
    }

    fn all_acked(&self) -> bool {
        self.transactions
            .iter()
            .all(|t| t.status == TransactionStatus::Acked)
    }

    fn mark_pending(&mut self, status: TransactionStatus) {
        for t in &mut self.transactions {
            if t.status == TransactionStatus::Pending {
                t.status = status;
            }
        }
    }
}

/// Tracks the expected transactions of at most one operation per flow.
///
/// Completions are returned to the caller rather than sent anywhere, so the
/// owner decides what to do with them.
#[derive(Debug, Default)]
pub struct TransactionTracker {
    open: HashMap<String, OpenOperation>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the expected transactions of an operation.
    pub fn open(
        &mut self,
        flow_id: &str,
        operation_id: OperationId,
        expected: Vec<Transaction>,
        deadline: Instant,
    ) -> Result<(), TrackerError> {
        if let Some(existing) = self.open.get(flow_id) {
            return Err(TrackerError::AlreadyOpen {
                flow_id: flow_id.to_string(),
                operation_id: existing.operation_id,
            });
        }
        if expected.is_empty() {
            return Err(TrackerError::Empty {
                flow_id: flow_id.to_string(),
                operation_id,
            });
        }
        debug!(
            "Opened {} for flow {} with {} transactions",
            operation_id,
            flow_id,
            expected.len()
        );
        self.open.insert(
            flow_id.to_string(),
            OpenOperation {
                operation_id,
                transactions: expected,
                deadline,
            },
        );
        Ok(())
    }

    /// Records a successful ack. Returns the completion once every
    /// transaction of the operation is acked.
    pub fn ack(
        &mut self,
        switch_id: &SwitchId,
        flow_id: &str,
        transaction_id: Uuid,
    ) -> Option<Completion> {
        let operation = self.open.get_mut(flow_id)?;
        let transaction = Self::find_pending(operation, switch_id, flow_id, transaction_id)?;
        transaction.status = TransactionStatus::Acked;

        if !operation.all_acked() {
            return None;
        }
        let operation = self.open.remove(flow_id)?;
        debug!("{} for flow {} committed", operation.operation_id, flow_id);
        Some(Completion {
            flow_id: flow_id.to_string(),
            operation_id: operation.operation_id,
            outcome: CompletionOutcome::Committed,
            transactions: operation.transactions,
        })
    }

    /// Records a rejected command and fails the whole operation at once.
    ///
    /// Remaining pending transactions are cancelled and later acks for them
    /// are treated as unknown.
    pub fn fail(
        &mut self,
        switch_id: &SwitchId,
        flow_id: &str,
        transaction_id: Uuid,
        cause: &str,
    ) -> Option<Completion> {
        let operation = self.open.get_mut(flow_id)?;
        let transaction = Self::find_pending(operation, switch_id, flow_id, transaction_id)?;
        transaction.status = TransactionStatus::Failed;

        let mut operation = self.open.remove(flow_id)?;
        operation.mark_pending(TransactionStatus::Cancelled);
        warn!(
            "{} for flow {} failed on {}: {}",
            operation.operation_id, flow_id, switch_id, cause
        );
        Some(Completion {
            flow_id: flow_id.to_string(),
            operation_id: operation.operation_id,
            outcome: CompletionOutcome::Failed {
                switches: vec![switch_id.clone()],
                cause: cause.to_string(),
            },
            transactions: operation.transactions,
        })
    }

    /// Fails every operation whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<Completion> {
        let expired: Vec<String> = self
            .open
            .iter()
            .filter(|(_, op)| op.deadline <= now)
            .map(|(flow_id, _)| flow_id.clone())
            .collect();

        let mut completions = Vec::with_capacity(expired.len());
        for flow_id in expired {
            let Some(mut operation) = self.open.remove(&flow_id) else {
                continue;
            };
            let switches = operation.pending_switches();
            operation.mark_pending(TransactionStatus::TimedOut);
            warn!(
                "{} for flow {} timed out waiting for {:?}",
                operation.operation_id, flow_id, switches
            );
            completions.push(Completion {
                flow_id,
                operation_id: operation.operation_id,
                outcome: CompletionOutcome::TimedOut { switches },
                transactions: operation.transactions,
            });
        }
        completions
    }

    pub fn is_open(&self, flow_id: &str) -> bool {
        self.open.contains_key(flow_id)
    }

    /// Number of operations awaiting acks.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Number of transactions still waiting for an ack.
    pub fn pending_count(&self) -> usize {
        self.open
            .values()
            .flat_map(|op| op.transactions.iter())
            .filter(|t| t.status == TransactionStatus::Pending)
            .count()
    }

    fn find_pending<'a>(
        operation: &'a mut OpenOperation,
        switch_id: &SwitchId,
        flow_id: &str,
        transaction_id: Uuid,
    ) -> Option<&'a mut Transaction> {
        let Some(transaction) = operation
            .transactions
            .iter_mut()
            .find(|t| t.transaction_id == transaction_id)
        else {
            warn!(
                "Dropping ack for unknown transaction {} of flow {} from {}",
                transaction_id, flow_id, switch_id
            );
            return None;
        };
        if &transaction.switch_id != switch_id {
            warn!(
                "Dropping ack for transaction {} of flow {}: expected from {}, got {}",
                transaction_id, flow_id, transaction.switch_id, switch_id
            );
            return None;
        }
        if transaction.status != TransactionStatus::Pending {
            debug!(
                "Dropping duplicate ack for transaction {} of flow {}",
                transaction_id, flow_id
            );
            return None;
        }
        Some(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_types::CommandKind;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn sw(id: &str) -> SwitchId {
        SwitchId::new(id).unwrap()
    }

    fn expected(switches: &[&str]) -> Vec<Transaction> {
        switches
            .iter()
            .map(|s| Transaction::new("f1", sw(s), CommandKind::Install))
            .collect()
    }

    fn open(tracker: &mut TransactionTracker, txns: &[Transaction], deadline: Instant) {
        tracker
            .open("f1", OperationId(1), txns.to_vec(), deadline)
            .unwrap();
    }

    #[test]
    fn test_completes_after_all_acks() {
        let mut tracker = TransactionTracker::new();
        let txns = expected(&["sw1", "sw2", "sw2"]);
        open(&mut tracker, &txns, Instant::now() + Duration::from_secs(30));

        assert!(tracker.ack(&sw("sw1"), "f1", txns[0].transaction_id).is_none());
        // A repeated ack does not count twice.
        assert!(tracker.ack(&sw("sw1"), "f1", txns[0].transaction_id).is_none());
        assert!(tracker.ack(&sw("sw2"), "f1", txns[2].transaction_id).is_none());
        assert_eq!(tracker.pending_count(), 1);

        let completion = tracker.ack(&sw("sw2"), "f1", txns[1].transaction_id).unwrap();
        assert!(completion.is_committed());
        assert_eq!(completion.acked().count(), 3);
        assert!(!tracker.is_open("f1"));
    }

    #[test]
    fn test_fail_fast_cancels_siblings() {
        let mut tracker = TransactionTracker::new();
        let txns = expected(&["sw1", "sw2", "sw3"]);
        open(&mut tracker, &txns, Instant::now() + Duration::from_secs(30));

        tracker.ack(&sw("sw1"), "f1", txns[0].transaction_id);
        let completion = tracker
            .fail(&sw("sw2"), "f1", txns[1].transaction_id, "rejected")
            .unwrap();
        assert_eq!(
            completion.outcome,
            CompletionOutcome::Failed {
                switches: vec![sw("sw2")],
                cause: "rejected".to_string(),
            }
        );
        let statuses: Vec<_> = completion.transactions.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![
                TransactionStatus::Acked,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled
            ]
        );
        assert_eq!(tracker.pending_count(), 0);

        // Late ack after the failure is dropped.
        assert!(tracker.ack(&sw("sw3"), "f1", txns[2].transaction_id).is_none());
    }

    #[test]
    fn test_unknown_acks_dropped() {
        let mut tracker = TransactionTracker::new();
        let txns = expected(&["sw1"]);
        open(&mut tracker, &txns, Instant::now() + Duration::from_secs(30));

        assert!(tracker.ack(&sw("sw1"), "f1", Uuid::new_v4()).is_none());
        assert!(tracker.ack(&sw("sw1"), "f2", txns[0].transaction_id).is_none());
        assert!(tracker.ack(&sw("sw9"), "f1", txns[0].transaction_id).is_none());
        assert!(tracker.is_open("f1"));
    }

    #[test]
    fn test_expire() {
        let mut tracker = TransactionTracker::new();
        let now = Instant::now();
        let txns = expected(&["sw1", "sw2"]);
        open(&mut tracker, &txns, now + Duration::from_secs(5));
        tracker.ack(&sw("sw1"), "f1", txns[0].transaction_id);

        assert!(tracker.expire(now).is_empty());
        let completions = tracker.expire(now + Duration::from_secs(5));
        assert_eq!(completions.len(), 1);
        assert_eq!(
            completions[0].outcome,
            CompletionOutcome::TimedOut {
                switches: vec![sw("sw2")]
            }
        );
        assert_eq!(completions[0].transactions[1].status, TransactionStatus::TimedOut);
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn test_open_rejects_duplicates_and_empty() {
        let mut tracker = TransactionTracker::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        open(&mut tracker, &expected(&["sw1"]), deadline);
        assert!(matches!(
            tracker.open("f1", OperationId(2), expected(&["sw1"]), deadline),
            Err(TrackerError::AlreadyOpen { .. })
        ));
        assert!(matches!(
            tracker.open("f2", OperationId(3), Vec::new(), deadline),
            Err(TrackerError::Empty { .. })
        ));
    }
}
