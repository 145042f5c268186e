//! Switch command transport messages.

use flow_types::{SwitchCommand, SwitchId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command handed to the speaker for delivery to one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerCommand {
    pub transaction_id: Uuid,
    pub flow_id: String,
    pub command: SwitchCommand,
}

impl SpeakerCommand {
    pub fn switch_id(&self) -> &SwitchId {
        self.command.switch_id()
    }
}

/// Result reported by a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckOutcome {
    Success,
    Failure(String),
}

/// Acknowledgement of one speaker command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerAck {
    pub switch_id: SwitchId,
    pub flow_id: String,
    pub transaction_id: Uuid,
    pub outcome: AckOutcome,
}

impl SpeakerAck {
    pub fn success(command: &SpeakerCommand) -> Self {
        Self {
            switch_id: command.switch_id().clone(),
            flow_id: command.flow_id.clone(),
            transaction_id: command.transaction_id,
            outcome: AckOutcome::Success,
        }
    }

    pub fn failure(command: &SpeakerCommand, cause: impl Into<String>) -> Self {
        Self {
            switch_id: command.switch_id().clone(),
            flow_id: command.flow_id.clone(),
            transaction_id: command.transaction_id,
            outcome: AckOutcome::Failure(cause.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ack_wire_format() {
        let json = r#"{"switch_id":"sw1","flow_id":"f1",
            "transaction_id":"67e55044-10b1-426f-9247-bb680e5fe0c8","outcome":"success"}"#;
        let ack: SpeakerAck = serde_json::from_str(json).unwrap();
        assert_eq!(ack.outcome, AckOutcome::Success);

        let json = r#"{"switch_id":"sw1","flow_id":"f1",
            "transaction_id":"67e55044-10b1-426f-9247-bb680e5fe0c8",
            "outcome":{"failure":"table full"}}"#;
        let ack: SpeakerAck = serde_json::from_str(json).unwrap();
        assert_eq!(ack.outcome, AckOutcome::Failure("table full".to_string()));
    }
}
