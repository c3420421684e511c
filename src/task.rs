use serde_json::Value;

use crate::ClientError;

/// Handle for a server-side long-running task.
///
/// Born from a `202 Accepted` response whose `Location` header points at the
/// task status endpoint. The handle stays valid until a poll resolves the
/// task to a terminal state, after which it should be discarded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskHandle {
    status_uri: String,
    task_id: String,
}

impl TaskHandle {
    /// Builds a handle from the `Location` header of an accepted submission.
    ///
    /// The task id is the last path segment of the location.
    pub fn from_location(location: impl Into<String>) -> Self {
        let status_uri = location.into();
        let task_id = status_uri
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(status_uri.as_str())
            .to_owned();
        Self {
            status_uri,
            task_id,
        }
    }

    /// Endpoint to query for the current task status.
    pub fn status_uri(&self) -> &str {
        &self.status_uri
    }

    /// Server-assigned task identifier.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

/// Lifecycle state of a server-side task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Accepted but not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a server-reported error.
    Failed,
    /// Canceled on the server side.
    Canceled,
}

impl TaskState {
    /// Whether a poll observing this state should stop.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Maps an appliance wire value to a state.
    ///
    /// Returns `None` for values this SDK does not recognize; the caller
    /// rejects those as malformed rather than guessing.
    fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "NONE" | "INITIALIZED" | "PENDING" | "QUEUED" => Some(Self::Pending),
            "EXECUTING" | "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELED" | "CANCELLED" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// Immutable snapshot of a task's status at one poll.
///
/// Each poll yields a fresh report; reports are never mutated in place.
#[derive(Clone, Debug)]
pub struct TaskReport {
    /// Lifecycle state parsed from the wire `status` field.
    pub state: TaskState,
    /// Completion percentage, when the server reports one.
    pub progress: Option<u64>,
    /// Human-readable status line from the server.
    pub status_message: Option<String>,
    /// Result payload of a completed task, when the server attaches one.
    pub result: Option<Value>,
    /// Server-provided error detail for a failed task.
    pub error: Option<String>,
}

impl TaskReport {
    /// Parses a raw task status payload, validating it at the boundary.
    ///
    /// A payload without a recognizable `status` string is rejected with
    /// [`ClientError::MalformedTask`] instead of surfacing missing-key
    /// lookups downstream.
    pub fn from_value(payload: &Value) -> Result<Self, ClientError> {
        let Some(raw_state) = payload.get("status").and_then(Value::as_str) else {
            return Err(ClientError::MalformedTask {
                reason: "missing or non-string 'status' field".to_owned(),
            });
        };
        let state = TaskState::from_wire(raw_state).ok_or_else(|| ClientError::MalformedTask {
            reason: format!("unrecognized status '{raw_state}'"),
        })?;

        Ok(Self {
            state,
            progress: payload.get("progress").and_then(Value::as_u64),
            status_message: payload
                .get("statusMessage")
                .and_then(Value::as_str)
                .map(str::to_owned),
            result: payload.get("result").filter(|v| !v.is_null()).cloned(),
            error: payload
                .get("errorMessage")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }

    /// Best available description of why a task failed.
    pub fn error_detail(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.status_message.clone())
            .unwrap_or_else(|| "no error detail provided".to_owned())
    }
}

/// Outcome of submitting a mutating request.
///
/// The appliance answers most mutations synchronously, but some return
/// `202 Accepted` plus a `Location` header and finish in the background.
#[derive(Clone, Debug)]
pub enum Submission {
    /// The request completed within the request/response cycle.
    Done(Value),
    /// The server created a background task; poll the handle to completion.
    Accepted(TaskHandle),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{TaskHandle, TaskReport, TaskState};
    use crate::ClientError;

    #[test]
    fn handle_takes_task_id_from_last_location_segment() {
        let handle =
            TaskHandle::from_location("https://anvil.example:8443/mgmt/v1.2/rest/tasks/8f2c");
        assert_eq!(handle.task_id(), "8f2c");
        assert_eq!(
            handle.status_uri(),
            "https://anvil.example:8443/mgmt/v1.2/rest/tasks/8f2c"
        );
    }

    #[test]
    fn handle_ignores_trailing_slash_in_location() {
        let handle = TaskHandle::from_location("/mgmt/v1.2/rest/tasks/8f2c/");
        assert_eq!(handle.task_id(), "8f2c");
    }

    #[test]
    fn report_parses_running_task_with_progress() {
        let payload = json!({
            "status": "EXECUTING",
            "progress": 40,
            "statusMessage": "copying files",
        });
        let report = TaskReport::from_value(&payload).expect("valid payload");
        assert_eq!(report.state, TaskState::Running);
        assert!(!report.state.is_terminal());
        assert_eq!(report.progress, Some(40));
        assert_eq!(report.status_message.as_deref(), Some("copying files"));
    }

    #[test]
    fn report_parses_completed_task_with_result() {
        let payload = json!({
            "status": "COMPLETED",
            "result": {"uuid": "abc"},
        });
        let report = TaskReport::from_value(&payload).expect("valid payload");
        assert_eq!(report.state, TaskState::Completed);
        assert!(report.state.is_terminal());
        assert_eq!(report.result, Some(json!({"uuid": "abc"})));
    }

    #[test]
    fn report_prefers_error_message_as_failure_detail() {
        let payload = json!({
            "status": "FAILED",
            "statusMessage": "task aborted",
            "errorMessage": "share name already in use",
        });
        let report = TaskReport::from_value(&payload).expect("valid payload");
        assert_eq!(report.state, TaskState::Failed);
        assert_eq!(report.error_detail(), "share name already in use");
    }

    #[test]
    fn report_rejects_missing_status() {
        let payload = json!({"progress": 10});
        let error = TaskReport::from_value(&payload).expect_err("must reject");
        assert!(matches!(error, ClientError::MalformedTask { .. }));
    }

    #[test]
    fn report_rejects_unknown_status_value() {
        let payload = json!({"status": "EXPLODED"});
        let error = TaskReport::from_value(&payload).expect_err("must reject");
        match error {
            ClientError::MalformedTask { reason } => assert!(reason.contains("EXPLODED")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
