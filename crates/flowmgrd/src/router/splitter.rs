//! Envelope decoding.

use crate::error::{FlowError, FlowResult};
use crate::messaging::{
    FlowCacheSyncRequest, FlowIdPayload, FlowReadPayload, FlowRequest, RequestEnvelope,
    StreamType, SwitchActivated,
};
use flow_types::Flow;
use serde::de::DeserializeOwned;

/// Requests handled outside the keyed partitions.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkRequest {
    /// `flow_read` without a flow id.
    ReadAll,
    CacheSync(FlowCacheSyncRequest),
    SwitchActivated(SwitchActivated),
}

impl BulkRequest {
    pub fn stream_type(&self) -> StreamType {
        match self {
            BulkRequest::ReadAll => StreamType::Read,
            BulkRequest::CacheSync(_) => StreamType::CacheSync,
            BulkRequest::SwitchActivated(_) => StreamType::SwitchActivated,
        }
    }
}

/// Where a decoded request goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Keyed(FlowRequest),
    Bulk(BulkRequest),
}

/// Stateless envelope classifier.
pub struct Splitter;

impl Splitter {
    /// Decodes the payload according to the envelope type.
    pub fn classify(envelope: &RequestEnvelope) -> FlowResult<Routed> {
        let stream = StreamType::from_message_type(&envelope.message_type).ok_or_else(|| {
            FlowError::Serialization(format!("unknown message type {:?}", envelope.message_type))
        })?;

        let keyed = |request: FlowRequest| Ok(Routed::Keyed(request));
        match stream {
            StreamType::Create => keyed(FlowRequest::Create(decode::<Flow>(envelope)?)),
            StreamType::Update => keyed(FlowRequest::Update(decode::<Flow>(envelope)?)),
            StreamType::Read => {
                let payload: FlowReadPayload = if envelope.payload.is_null() {
                    FlowReadPayload::default()
                } else {
                    decode(envelope)?
                };
                match payload.flow_id {
                    Some(flow_id) => keyed(FlowRequest::Read { flow_id }),
                    None => Ok(Routed::Bulk(BulkRequest::ReadAll)),
                }
            }
            StreamType::Delete => keyed(FlowRequest::Delete {
                flow_id: flow_id(envelope)?,
            }),
            StreamType::Push => keyed(FlowRequest::Push {
                flow_id: flow_id(envelope)?,
            }),
            StreamType::Unpush => keyed(FlowRequest::Unpush {
                flow_id: flow_id(envelope)?,
            }),
            StreamType::Path => keyed(FlowRequest::Path {
                flow_id: flow_id(envelope)?,
            }),
            StreamType::Restore => keyed(FlowRequest::Restore {
                flow_id: flow_id(envelope)?,
            }),
            StreamType::Reroute => keyed(FlowRequest::Reroute {
                flow_id: flow_id(envelope)?,
            }),
            StreamType::Status => keyed(FlowRequest::Status {
                flow_id: flow_id(envelope)?,
            }),
            StreamType::CacheSync => Ok(Routed::Bulk(BulkRequest::CacheSync(decode(envelope)?))),
            StreamType::SwitchActivated => {
                Ok(Routed::Bulk(BulkRequest::SwitchActivated(decode(envelope)?)))
            }
            StreamType::Sync => Err(FlowError::Serialization(
                "sync requests are internal".to_string(),
            )),
        }
    }
}

fn decode<T: DeserializeOwned>(envelope: &RequestEnvelope) -> FlowResult<T> {
    serde_json::from_value(envelope.payload.clone()).map_err(|e| {
        FlowError::Serialization(format!("bad {} payload: {}", envelope.message_type, e))
    })
}

fn flow_id(envelope: &RequestEnvelope) -> FlowResult<String> {
    decode::<FlowIdPayload>(envelope).map(|payload| payload.flow_id)
}
