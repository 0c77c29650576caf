//! Run events
//!
//! One typed event per message sent to websocket subscribers. Webhook payloads
//! reuse the same events: `data` is the event body without its `event` and
//! `test_id` fields.

use chrono::{DateTime, Local, Utc};
use flowcheck_common::LogStream;
use flowcheck_core::RunSnapshot;
use serde::Serialize;
use serde_json::Value;

/// Execution state of a registry entry, distinct from the run's PASSED/FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Running,
    Completed,
    Error,
}

impl ExecutionState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, ExecutionState::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    InitialLogs {
        test_id: String,
        logs: String,
        status: ExecutionState,
    },
    LogUpdate {
        test_id: String,
        log: String,
        stream_type: LogStream,
        timestamp: DateTime<Utc>,
    },
    TestStarted {
        test_id: String,
        status: ExecutionState,
        start_time: DateTime<Utc>,
    },
    TestCompleted {
        test_id: String,
        status: ExecutionState,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        result: Box<RunSnapshot>,
    },
    TestError {
        test_id: String,
        status: ExecutionState,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Box<RunSnapshot>>,
    },
    Error {
        message: String,
    },
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::InitialLogs { .. } => "initial_logs",
            RunEvent::LogUpdate { .. } => "log_update",
            RunEvent::TestStarted { .. } => "test_started",
            RunEvent::TestCompleted { .. } => "test_completed",
            RunEvent::TestError { .. } => "test_error",
            RunEvent::Error { .. } => "error",
        }
    }

    /// Wire form for websocket clients
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({"event": "error", "message": e.to_string()}).to_string()
        })
    }

    /// Body of the matching webhook payload
    pub fn webhook_data(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(object) = value.as_object_mut() {
            object.remove("event");
            object.remove("test_id");
        }
        value
    }
}

/// Outbound webhook body
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event: String,
    pub test_id: String,
    pub timestamp: String,
    pub data: Value,
}

impl WebhookPayload {
    pub fn new(test_id: &str, event: &RunEvent) -> Self {
        Self {
            event: event.name().to_string(),
            test_id: test_id.to_string(),
            timestamp: Local::now().to_rfc3339(),
            data: event.webhook_data(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = RunEvent::TestStarted {
            test_id: "run_1".to_string(),
            status: ExecutionState::Running,
            start_time: Utc::now(),
        };
        let value: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["event"], "test_started");
        assert_eq!(value["status"], "running");
        assert_eq!(value["test_id"], "run_1");
    }

    #[test]
    fn test_webhook_data_drops_envelope() {
        let event = RunEvent::TestError {
            test_id: "run_1".to_string(),
            status: ExecutionState::Error,
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            error: "Missing required configuration: BASE_URL".to_string(),
            result: None,
        };
        let payload = WebhookPayload::new("run_1", &event);
        assert_eq!(payload.event, "test_error");
        assert_eq!(payload.data["status"], "error");
        assert!(payload.data.get("event").is_none());
        assert!(payload.data.get("test_id").is_none());
        assert!(payload.data.get("result").is_none());
    }
}
