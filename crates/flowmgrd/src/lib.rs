//! Flow manager daemon - flow CRUD orchestration.
//!
//! `flowmgrd` accepts flow lifecycle requests, asks a path computer for a
//! route, turns the route into per-switch install/remove commands and
//! correlates the switches' acknowledgements into one flow-level outcome.
//!
//! # Architecture
//!
//! ```text
//! [requests] ──> [Splitter] ──┬──> [PartitionRouter] ──> [worker N: CrudEngine + TransactionTracker]
//!                             │                                   │            ↑
//!                             └──> [bulk handler]                 ↓            │
//!                                                          [SpeakerSink]   [speaker acks]
//!                                                                 │
//!                                        [ReplyComposer] <────────┘
//! ```
//!
//! # Key Components
//!
//! - [`router`]: classifies requests and routes them by flow id
//! - [`crud::CrudEngine`]: per-partition flow state machine
//! - [`transaction::TransactionTracker`]: ack correlation and deadlines
//! - [`reply`]: exactly-once replies per request
//! - [`daemon::FlowDaemon`]: wires workers, bulk handler and collaborators

pub mod audit;
pub mod cache_sync;
pub mod config;
pub mod crud;
pub mod daemon;
pub mod error;
pub mod messaging;
pub mod reply;
pub mod router;
pub mod transaction;

pub use config::{FeatureToggles, FlowMgrConfig, IslConfig, ResourceConfig};
pub use crud::{
    ChannelSpeaker, CrudEngine, FlowRepository, InMemoryFlowStore, PathComputer, PathRequest,
    SpeakerSink, StaticTopology,
};
pub use daemon::{Collaborators, FlowDaemon, WorkerStats};
pub use error::{ErrorKind, FlowError, FlowResult};
pub use reply::{ReplyComposer, Responder};
pub use messaging::{
    FlowResponse, Reply, ReplyBody, RequestEnvelope, SpeakerAck, SpeakerCommand, StreamType,
};
pub use transaction::{TransactionStatus, TransactionTracker};
