//! Outbound replies.

use super::cache_sync::FlowCacheSyncResults;
use super::request::StreamType;
use crate::error::{ErrorKind, FlowError};
use flow_types::{FlowPair, FlowState, PathInfo, SwitchId};
use serde::{Deserialize, Serialize};

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResponse {
    Flow(FlowPair),
    Flows(Vec<FlowPair>),
    Deleted(FlowPair),
    Status {
        flow_id: String,
        state: FlowState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        in_flight: Option<StreamType>,
    },
    Path {
        flow_id: String,
        forward: PathInfo,
        reverse: PathInfo,
    },
    Rerouted {
        flow: FlowPair,
        rerouted: bool,
    },
    CacheSync(FlowCacheSyncResults),
    Reflow {
        switch_id: SwitchId,
        flow_ids: Vec<String>,
    },
}

/// Failure details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error_type: ErrorKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub switch_ids: Vec<SwitchId>,
}

impl From<&FlowError> for ErrorData {
    fn from(err: &FlowError) -> Self {
        Self {
            error_type: err.kind(),
            description: err.to_string(),
            flow_id: err.flow_id().map(str::to_string),
            switch_ids: err.switch_ids().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ReplyBody {
    FlowResponse(FlowResponse),
    Error(ErrorData),
}

/// One reply, correlated to the request that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub correlation_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub body: ReplyBody,
}

impl Reply {
    pub fn new(correlation_id: impl Into<String>, body: ReplyBody) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            body,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ReplyBody::Error(_))
    }

    pub fn error(&self) -> Option<&ErrorData> {
        match &self.body {
            ReplyBody::Error(data) => Some(data),
            ReplyBody::FlowResponse(_) => None,
        }
    }

    pub fn response(&self) -> Option<&FlowResponse> {
        match &self.body {
            ReplyBody::FlowResponse(response) => Some(response),
            ReplyBody::Error(_) => None,
        }
    }
}
