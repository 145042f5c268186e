//! Structured audit trail for flow lifecycle events.
//!
//! Records are emitted through [`audit_log!`](crate::audit_log) under the
//! `audit` tracing target. The level follows the outcome: successes at
//! info, in-progress steps at debug, failures at warn. Each record carries
//! its JSON form so log shippers can index it without parsing the message.

use chrono::{DateTime, Utc};
use flow_types::SwitchId;
use serde::Serialize;
use std::fmt;

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    FlowCreate,
    FlowModify,
    FlowDelete,
    /// Rules forced on or off a switch without changing the flow record.
    RuleSync,
    SwitchEvent,
    SystemLifecycle,
    /// A committed operation left the network out of step with the record.
    ErrorCondition,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditCategory::FlowCreate => "FLOW_CREATE",
            AuditCategory::FlowModify => "FLOW_MODIFY",
            AuditCategory::FlowDelete => "FLOW_DELETE",
            AuditCategory::RuleSync => "RULE_SYNC",
            AuditCategory::SwitchEvent => "SWITCH_EVENT",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
            AuditCategory::ErrorCondition => "ERROR_CONDITION",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
}

/// What an audit record is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum AuditObject {
    Flow(String),
    Switch(SwitchId),
}

impl fmt::Display for AuditObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditObject::Flow(flow_id) => write!(f, "flow {}", flow_id),
            AuditObject::Switch(switch_id) => write!(f, "switch {}", switch_id),
        }
    }
}

/// One audit record, handed to `audit_log!`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<AuditObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped now, outcome in progress.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object: None,
            details: None,
            error: None,
            correlation_id: None,
        }
    }

    pub fn for_flow(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
        flow_id: &str,
    ) -> Self {
        let mut record = Self::new(category, source, action);
        record.object = Some(AuditObject::Flow(flow_id.to_string()));
        record
    }

    pub fn for_switch(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
        switch_id: &SwitchId,
    ) -> Self {
        let mut record = Self::new(category, source, action);
        record.object = Some(AuditObject::Switch(switch_id.clone()));
        record
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the outcome as failure.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// One-line form used as the log message.
    pub fn summary(&self) -> String {
        match &self.object {
            Some(object) => format!("{} {} on {}", self.category, self.action, object),
            None => format!("{} {}", self.category, self.action),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits an [`AuditRecord`] at the level matching its outcome.
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {{
        let record: $crate::audit::AuditRecord = $record;
        let json = record.to_json();
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(target: "audit", audit_json = %json, "AUDIT: {}", record.summary());
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(target: "audit", audit_json = %json, "AUDIT: {}", record.summary());
            }
            $crate::audit::AuditOutcome::Failure => {
                tracing::warn!(
                    target: "audit",
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %json,
                    "AUDIT: {} failed",
                    record.summary()
                );
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder() {
        let record = AuditRecord::for_flow(AuditCategory::FlowCreate, "CrudEngine", "create", "f1")
            .with_correlation_id("c-1")
            .with_details(serde_json::json!({"bandwidth": 1000}));
        assert_eq!(record.outcome, AuditOutcome::InProgress);
        assert_eq!(record.object, Some(AuditObject::Flow("f1".to_string())));
        assert_eq!(record.summary(), "FLOW_CREATE create on flow f1");

        let failed = record.with_error("no path");
        assert_eq!(failed.outcome, AuditOutcome::Failure);
    }

    #[test]
    fn test_json_shape() {
        let switch_id = SwitchId::new("sw1").unwrap();
        let record = AuditRecord::for_switch(
            AuditCategory::SwitchEvent,
            "FlowDaemon",
            "switch_activated",
            &switch_id,
        )
        .with_outcome(AuditOutcome::Success);
        let value: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        assert_eq!(value["category"], "SWITCH_EVENT");
        assert_eq!(value["outcome"], "success");
        assert_eq!(value["object"], serde_json::json!({"type": "switch", "id": "sw1"}));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_macro_accepts_record() {
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "test", "noop")
            .with_outcome(AuditOutcome::Success));
    }
}
