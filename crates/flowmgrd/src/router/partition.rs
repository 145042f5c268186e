//! Stable flow-id to worker mapping.

use crate::error::{FlowError, FlowResult};
use ahash::RandomState;
use log::error;
use tokio::sync::mpsc;

// Fixed seeds keep the mapping identical across restarts.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Routes messages to per-partition mailboxes by flow id.
#[derive(Debug)]
pub struct PartitionRouter<M> {
    mailboxes: Vec<mpsc::UnboundedSender<M>>,
    hasher: RandomState,
}

impl<M> PartitionRouter<M> {
    pub fn new(mailboxes: Vec<mpsc::UnboundedSender<M>>) -> Self {
        Self {
            mailboxes,
            hasher: RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]),
        }
    }

    pub fn partitions(&self) -> usize {
        self.mailboxes.len()
    }

    /// Partition owning the flow id.
    pub fn partition_of(&self, flow_id: &str) -> usize {
        if self.mailboxes.is_empty() {
            return 0;
        }
        (self.hasher.hash_one(flow_id) % self.mailboxes.len() as u64) as usize
    }

    /// Delivers a message to the owning partition.
    ///
    /// The message is dropped if the partition has stopped.
    pub fn route(&self, flow_id: &str, message: M) -> FlowResult<()> {
        let partition = self.partition_of(flow_id);
        let mailbox = self
            .mailboxes
            .get(partition)
            .ok_or_else(|| FlowError::internal("no partitions configured"))?;
        mailbox.send(message).map_err(|_| {
            error!("Partition {} stopped, dropping message for {}", partition, flow_id);
            FlowError::internal(format!("partition {} is not running", partition))
        })
    }

    /// Sends one message to every partition. Returns how many were delivered.
    pub fn broadcast(&self, mut make: impl FnMut(usize) -> M) -> usize {
        self.mailboxes
            .iter()
            .enumerate()
            .filter(|(index, mailbox)| mailbox.send(make(*index)).is_ok())
            .count()
    }
}
