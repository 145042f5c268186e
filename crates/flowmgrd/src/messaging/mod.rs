//! Wire messages exchanged with the outside world.
//!
//! All messages are JSON. Inbound requests arrive in a
//! [`RequestEnvelope`]; replies leave as a [`Reply`]; switch commands and
//! their acknowledgements travel as [`SpeakerCommand`] / [`SpeakerAck`].

mod cache_sync;
mod request;
mod response;
mod speaker;

pub use cache_sync::{
    FlowCacheSyncRequest, FlowCacheSyncResults, RuleRef, SwitchRules, SyncCacheAction,
};
pub use request::{
    FlowIdPayload, FlowReadPayload, FlowRequest, RequestEnvelope, StreamType, SwitchActivated,
};
pub use response::{ErrorData, FlowResponse, Reply, ReplyBody};
pub use speaker::{AckOutcome, SpeakerAck, SpeakerCommand};
