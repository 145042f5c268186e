//! Flow CRUD engine and the collaborators it depends on.
//!
//! The engine itself is synchronous: it never awaits. Path computation is
//! requested by returning [`Progress::AwaitingPath`]; the owning worker runs
//! the [`PathComputer`] and feeds the result back with
//! [`CrudEngine::on_path_computed`].

mod commands;
mod engine;
mod resources;
mod store;
mod topology;
mod validation;

pub use commands::{install_commands, remove_commands, remove_on};
pub use engine::{CrudEngine, EngineConfig, Progress};
pub use resources::{Allocation, ResourcePool};
pub use store::InMemoryFlowStore;
pub use topology::StaticTopology;
pub use validation::{topology_changed, validate_flow};

use crate::error::{FlowError, FlowResult};
use crate::messaging::SpeakerCommand;
use crate::transaction::OperationId;
use async_trait::async_trait;
use flow_types::{Flow, FlowPair, PathInfo, SwitchId};
use tokio::sync::mpsc;

/// Request for a path between two switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRequest {
    pub flow_id: String,
    pub src_switch: SwitchId,
    pub dst_switch: SwitchId,
    /// Bandwidth to reserve; `None` ignores link capacity.
    pub bandwidth: Option<i64>,
}

impl PathRequest {
    pub fn for_flow(flow: &Flow) -> FlowResult<Self> {
        let (src, dst) = flow.endpoints().map_err(|e| FlowError::from(e).for_flow(&flow.flow_id))?;
        Ok(Self {
            flow_id: flow.flow_id.clone(),
            src_switch: src.clone(),
            dst_switch: dst.clone(),
            bandwidth: (!flow.ignore_bandwidth).then_some(flow.bandwidth),
        })
    }
}

/// Path computation result posted back to the owning worker.
#[derive(Debug)]
pub struct PathReply {
    pub flow_id: String,
    pub operation_id: OperationId,
    pub result: FlowResult<PathInfo>,
}

/// External path computation service.
#[async_trait]
pub trait PathComputer: Send + Sync {
    /// Returns the forward path; an empty path for one-switch flows.
    async fn compute(&self, request: PathRequest) -> FlowResult<PathInfo>;
}

/// Flow store keyed by flow id.
///
/// Each id is written only by the worker that owns it; bulk readers use
/// [`snapshot`](Self::snapshot).
pub trait FlowRepository: Send + Sync {
    fn get(&self, flow_id: &str) -> Option<FlowPair>;
    fn put(&self, pair: FlowPair);
    fn remove(&self, flow_id: &str) -> Option<FlowPair>;
    fn contains(&self, flow_id: &str) -> bool;
    /// Copy of every stored pair, ordered by flow id.
    fn snapshot(&self) -> Vec<FlowPair>;
}

/// Outbound switch command transport.
pub trait SpeakerSink: Send + Sync {
    fn send(&self, command: SpeakerCommand) -> FlowResult<()>;
}

/// Speaker backed by a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSpeaker {
    tx: mpsc::UnboundedSender<SpeakerCommand>,
}

impl ChannelSpeaker {
    pub fn new(tx: mpsc::UnboundedSender<SpeakerCommand>) -> Self {
        Self { tx }
    }

    /// Creates a speaker and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SpeakerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl SpeakerSink for ChannelSpeaker {
    fn send(&self, command: SpeakerCommand) -> FlowResult<()> {
        self.tx
            .send(command)
            .map_err(|_| FlowError::internal("speaker channel closed"))
    }
}
