//! Inbound request envelope and typed requests.

use crate::cache_sync::SyncAction;
use flow_types::{Flow, SwitchId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation kind a request maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamType {
    Create,
    Read,
    Update,
    Delete,
    Push,
    Unpush,
    Path,
    Restore,
    Reroute,
    Status,
    CacheSync,
    SwitchActivated,
    /// Internal rule correction issued by cache sync or switch reflow.
    Sync,
}

impl StreamType {
    /// Maps an envelope `type` to its stream.
    pub fn from_message_type(message_type: &str) -> Option<Self> {
        let stream = match message_type {
            "flow_create" => StreamType::Create,
            "flow_read" => StreamType::Read,
            "flow_update" => StreamType::Update,
            "flow_delete" => StreamType::Delete,
            "flow_push" => StreamType::Push,
            "flow_unpush" => StreamType::Unpush,
            "flow_path" => StreamType::Path,
            "flow_restore" => StreamType::Restore,
            "flow_reroute" => StreamType::Reroute,
            "flow_status" => StreamType::Status,
            "flow_cache_sync" => StreamType::CacheSync,
            "switch_activated" => StreamType::SwitchActivated,
            _ => return None,
        };
        Some(stream)
    }

    /// Read-only single-flow streams are answered without queueing.
    pub fn is_read_only(&self) -> bool {
        matches!(self, StreamType::Read | StreamType::Path | StreamType::Status)
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamType::Create => "CREATE",
            StreamType::Read => "READ",
            StreamType::Update => "UPDATE",
            StreamType::Delete => "DELETE",
            StreamType::Push => "PUSH",
            StreamType::Unpush => "UNPUSH",
            StreamType::Path => "PATH",
            StreamType::Restore => "RESTORE",
            StreamType::Reroute => "REROUTE",
            StreamType::Status => "STATUS",
            StreamType::CacheSync => "CACHE_SYNC",
            StreamType::SwitchActivated => "SWITCH_ACTIVATED",
            StreamType::Sync => "SYNC",
        };
        write!(f, "{}", s)
    }
}

fn unknown_correlation_id() -> String {
    "unknown".to_string()
}

/// Inbound message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "unknown_correlation_id")]
    pub correlation_id: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl RequestEnvelope {
    pub fn new(
        message_type: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            correlation_id: correlation_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Payload of requests addressed by flow id only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowIdPayload {
    pub flow_id: String,
}

/// Payload of `flow_read`; no flow id reads every flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowReadPayload {
    #[serde(default)]
    pub flow_id: Option<String>,
}

/// A switch (re)connected to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchActivated {
    pub switch_id: SwitchId,
}

/// A request scoped to one flow id.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowRequest {
    Create(Flow),
    Update(Flow),
    Read { flow_id: String },
    Delete { flow_id: String },
    Push { flow_id: String },
    Unpush { flow_id: String },
    Path { flow_id: String },
    Restore { flow_id: String },
    Reroute { flow_id: String },
    Status { flow_id: String },
    Sync { flow_id: String, action: SyncAction },
}

impl FlowRequest {
    pub fn flow_id(&self) -> &str {
        match self {
            FlowRequest::Create(flow) | FlowRequest::Update(flow) => &flow.flow_id,
            FlowRequest::Read { flow_id }
            | FlowRequest::Delete { flow_id }
            | FlowRequest::Push { flow_id }
            | FlowRequest::Unpush { flow_id }
            | FlowRequest::Path { flow_id }
            | FlowRequest::Restore { flow_id }
            | FlowRequest::Reroute { flow_id }
            | FlowRequest::Status { flow_id }
            | FlowRequest::Sync { flow_id, .. } => flow_id,
        }
    }

    pub fn stream_type(&self) -> StreamType {
        match self {
            FlowRequest::Create(_) => StreamType::Create,
            FlowRequest::Update(_) => StreamType::Update,
            FlowRequest::Read { .. } => StreamType::Read,
            FlowRequest::Delete { .. } => StreamType::Delete,
            FlowRequest::Push { .. } => StreamType::Push,
            FlowRequest::Unpush { .. } => StreamType::Unpush,
            FlowRequest::Path { .. } => StreamType::Path,
            FlowRequest::Restore { .. } => StreamType::Restore,
            FlowRequest::Reroute { .. } => StreamType::Reroute,
            FlowRequest::Status { .. } => StreamType::Status,
            FlowRequest::Sync { .. } => StreamType::Sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_message_types() {
        assert_eq!(StreamType::from_message_type("flow_create"), Some(StreamType::Create));
        assert_eq!(
            StreamType::from_message_type("flow_cache_sync"),
            Some(StreamType::CacheSync)
        );
        assert_eq!(StreamType::from_message_type("flow_sync"), None);
        assert!(StreamType::Status.is_read_only());
        assert!(!StreamType::Delete.is_read_only());
    }

    #[test]
    fn test_envelope_defaults() {
        let envelope: RequestEnvelope = serde_json::from_str(r#"{"type":"flow_read"}"#).unwrap();
        assert_eq!(envelope.correlation_id, "unknown");
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn test_request_accessors() {
        let request = FlowRequest::Delete {
            flow_id: "f1".to_string(),
        };
        assert_eq!(request.flow_id(), "f1");
        assert_eq!(request.stream_type().to_string(), "DELETE");
    }
}
