//! Audit event vocabulary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunSummary;

/// Remote call kind recorded by write attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    Create,
    Update,
}

impl std::fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOperation::Create => write!(f, "create"),
            WriteOperation::Update => write!(f, "update"),
        }
    }
}

/// Everything worth keeping about a run, beyond the primary log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditEvent {
    /// The run passed setup and is about to read rows
    RunStarted {
        source: String,
        schema: String,
        entity_type: String,
        sinks: Vec<String>,
    },

    /// A map key could not be compiled
    KeyDropped { field: String, reason: String },

    /// A field was left out of a row's entity
    FieldDropped { row: u64, field: String, reason: String },

    /// A record could not be read from the source
    RowUnreadable { row: Option<u64>, reason: String },

    /// A row failed whole-object validation
    RowRejected {
        row: u64,
        reason: String,
        partial_object: Value,
    },

    /// One remote call and its response
    WriteAttempt {
        sink: String,
        row: u64,
        entity_id: String,
        operation: WriteOperation,
        attempt: u32,
        status: Option<u16>,
        body: String,
    },

    /// Final outcome of one (entity, sink) pair
    WriteCompleted {
        sink: String,
        row: u64,
        entity_id: String,
        outcome: String,
        reason: Option<String>,
    },

    /// Counters at the end of the run
    RunCompleted { summary: RunSummary },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::RunStarted { .. } => "RunStarted",
            AuditEvent::KeyDropped { .. } => "KeyDropped",
            AuditEvent::FieldDropped { .. } => "FieldDropped",
            AuditEvent::RowUnreadable { .. } => "RowUnreadable",
            AuditEvent::RowRejected { .. } => "RowRejected",
            AuditEvent::WriteAttempt { .. } => "WriteAttempt",
            AuditEvent::WriteCompleted { .. } => "WriteCompleted",
            AuditEvent::RunCompleted { .. } => "RunCompleted",
        }
    }
}

/// A timestamped audit line
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn new(run_id: impl Into<String>, event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: run_id.into(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_serialization() {
        let entry = AuditEntry::new(
            "run-1",
            AuditEvent::WriteAttempt {
                sink: "orion".into(),
                row: 4,
                entity_id: "urn:x".into(),
                operation: WriteOperation::Create,
                attempt: 1,
                status: Some(422),
                body: "{\"description\":\"Already Exists\"}".into(),
            },
        );
        let value = serde_json::to_value(&entry).unwrap();

        assert!(value.get("ts").is_some());
        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["event"]["type"], "WriteAttempt");
        assert_eq!(value["event"]["operation"], "create");
        assert_eq!(value["event"]["status"], 422);
    }

    #[test]
    fn test_entry_deserialization() {
        let line = json!({
            "ts": "2024-05-01T10:00:00Z",
            "run_id": "r",
            "event": {"type": "FieldDropped", "row": 2, "field": "speed", "reason": "'x' is not a number"}
        });
        let entry: AuditEntry = serde_json::from_value(line).unwrap();
        assert_eq!(entry.event.event_type(), "FieldDropped");
    }
}
