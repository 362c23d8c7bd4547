//! Wire codec for the task-status channel.
//!
//! Inbound frames are JSON envelopes of the form
//! `{"type": "...", "data": {"task_id": .., "task_type": .., "timestamp": .., ...}}`.
//! The server acknowledges heartbeats with a bare `{"type": "pong"}`.

use crate::error::{WsError, WsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type tag of the server's heartbeat acknowledgment.
pub const PONG_TYPE: &str = "pong";

// ============================================================================
// Outbound
// ============================================================================

/// Outgoing request to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WsRequest {
    #[serde(rename = "type")]
    pub request_type: String,
}

impl WsRequest {
    /// Create a heartbeat ping request.
    pub fn ping() -> Self {
        Self {
            request_type: "ping".to_string(),
        }
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Kind of task event carried by an envelope.
///
/// Unknown type strings are kept as `Other` so newer server events still
/// reach subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskEventKind {
    TaskStatusUpdate,
    TaskProgressUpdate,
    BacktestIntermediateResults,
    ExecutionLog,
    Other(String),
}

impl TaskEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TaskStatusUpdate => "task_status_update",
            Self::TaskProgressUpdate => "task_progress_update",
            Self::BacktestIntermediateResults => "backtest_intermediate_results",
            Self::ExecutionLog => "execution_log",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for TaskEventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "task_status_update" => Self::TaskStatusUpdate,
            "task_progress_update" => Self::TaskProgressUpdate,
            "backtest_intermediate_results" => Self::BacktestIntermediateResults,
            "execution_log" => Self::ExecutionLog,
            _ => Self::Other(s),
        }
    }
}

impl From<TaskEventKind> for String {
    fn from(kind: TaskEventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload common to every task event, plus the type-specific remainder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEventData {
    pub task_id: i64,
    pub task_type: String,
    /// ISO-8601 timestamp as sent by the server.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Fields specific to the event type (log lines, intermediate metrics, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskEventData {
    /// Parse `timestamp` as RFC 3339. Returns `None` for naive or malformed values.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// A decoded task event. Immutable once decoded; subscribers get a shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub kind: TaskEventKind,
    pub data: TaskEventData,
}

impl TaskEvent {
    pub fn task_id(&self) -> i64 {
        self.data.task_id
    }
}

/// Any frame the server may send on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Heartbeat acknowledgment. Never dispatched.
    Pong,
    /// Task event for subscribers.
    Task(TaskEvent),
}

/// Decode an inbound text frame.
pub fn decode(text: &str) -> WsResult<ServerMessage> {
    let value: Value = serde_json::from_str(text)?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        Some(_) => return Err(WsError::ParseError("invalid envelope type".to_string())),
        None => return Err(WsError::ParseError("envelope missing type".to_string())),
    };

    if kind == PONG_TYPE {
        return Ok(ServerMessage::Pong);
    }

    let event: TaskEvent = serde_json::from_value(value)?;
    Ok(ServerMessage::Task(event))
}
