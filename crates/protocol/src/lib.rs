use serde::{Deserialize, Serialize};
use std::fmt;

pub type CommandId = i64;

/// Lifecycle of a submitted script.
///
/// `pending -> in_process -> {completed, failed, stopped}`; the last three are
/// terminal and never left again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    InProcess,
    Completed,
    Failed,
    Stopped,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::InProcess => "in_process",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Stopped => "stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CommandStatus::Pending),
            "in_process" => Some(CommandStatus::InProcess),
            "completed" => Some(CommandStatus::Completed),
            "failed" => Some(CommandStatus::Failed),
            "stopped" => Some(CommandStatus::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Stopped
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    /// Staying in the same non-terminal state counts as allowed. A pending
    /// command can only start; startup reconciliation of orphaned records is
    /// the one writer that bypasses this check.
    pub fn can_transition_to(self, next: CommandStatus) -> bool {
        match self {
            CommandStatus::Pending => {
                matches!(next, CommandStatus::Pending | CommandStatus::InProcess)
            }
            CommandStatus::InProcess => next != CommandStatus::Pending,
            _ => false,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandRecord {
    pub id: CommandId,
    pub script: String,
    pub status: CommandStatus,
    pub output: String,
    /// RFC 3339 timestamp assigned by the store.
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateCommandRequest {
    pub script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&CommandStatus::InProcess).expect("serialize");
        assert_eq!(json, "\"in_process\"");
        let decoded: CommandStatus = serde_json::from_str("\"stopped\"").expect("deserialize");
        assert_eq!(decoded, CommandStatus::Stopped);
    }

    #[test]
    fn status_parse_matches_as_str() {
        for status in [
            CommandStatus::Pending,
            CommandStatus::InProcess,
            CommandStatus::Completed,
            CommandStatus::Failed,
            CommandStatus::Stopped,
        ] {
            assert_eq!(CommandStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CommandStatus::parse("in process"), None);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [
            CommandStatus::Completed,
            CommandStatus::Failed,
            CommandStatus::Stopped,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(CommandStatus::InProcess));
            assert!(!terminal.can_transition_to(CommandStatus::Completed));
        }
        assert!(CommandStatus::InProcess.can_transition_to(CommandStatus::Stopped));
        assert!(!CommandStatus::InProcess.can_transition_to(CommandStatus::Pending));
    }

    #[test]
    fn pending_can_only_start() {
        let pending = CommandStatus::Pending;
        assert!(pending.can_transition_to(CommandStatus::InProcess));
        assert!(pending.can_transition_to(CommandStatus::Pending));
        assert!(!pending.can_transition_to(CommandStatus::Completed));
        assert!(!pending.can_transition_to(CommandStatus::Failed));
        assert!(!pending.can_transition_to(CommandStatus::Stopped));
    }

    #[test]
    fn command_record_roundtrip() {
        let record = CommandRecord {
            id: 7,
            script: "echo A; echo B".to_string(),
            status: CommandStatus::Completed,
            output: "A\nB\n".to_string(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
        };
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains("\"status\":\"completed\""));
        let decoded: CommandRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(record, decoded);
    }
}
