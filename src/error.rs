use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors returned by REST client and task-polling operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Base URL is not a valid absolute URL.
    #[error("invalid base URL '{0}'")]
    InvalidBaseUrl(String),

    /// Endpoint path could not be joined to the base URL.
    #[error("invalid endpoint path '{0}'")]
    InvalidPath(String),

    /// The requested operation id is not present in the endpoint catalog.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// A required path template parameter was not provided.
    #[error("missing required path parameter '{parameter}' for operation '{operation_id}'")]
    MissingPathParameter {
        operation_id: String,
        parameter: String,
    },

    /// A session-scoped call was made before a successful login.
    #[error("not logged in to an Anvil; call login first")]
    NotLoggedIn,

    /// The appliance software is older than what this SDK supports.
    #[error("appliance software {appliance_version} is older than SDK {sdk_version}")]
    VersionMismatch {
        sdk_version: String,
        appliance_version: String,
    },

    /// HTTP transport-layer request failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response body could not be parsed as JSON.
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success HTTP status with response payload.
    ///
    /// `retry_after` carries the server's `Retry-After` hint when present,
    /// so rate-limited polls can honor it for one cycle.
    #[error("server returned status {status}: {body}")]
    HttpStatus {
        status: StatusCode,
        retry_after: Option<Duration>,
        body: String,
    },

    /// Task status payload is missing required fields or uses an
    /// unrecognized status value.
    #[error("malformed task payload: {reason}")]
    MalformedTask { reason: String },

    /// The server reported that the underlying task itself failed.
    #[error("task {task_id} failed: {detail}")]
    TaskFailed { task_id: String, detail: String },

    /// The polling budget was exhausted before the task reached a
    /// terminal state.
    #[error(
        "task {task_id} did not reach a terminal state within budget ({attempts} queries over {elapsed:?})"
    )]
    TaskTimeout {
        task_id: String,
        attempts: u32,
        elapsed: Duration,
    },

    /// The server canceled the task before it completed.
    ///
    /// Distinct from [`Self::Canceled`], which is a caller-side abort of
    /// the poll.
    #[error("task {task_id} was canceled on the server")]
    TaskCanceled { task_id: String },

    /// Polling was aborted by the caller.
    #[error("polling of task {task_id} was canceled")]
    Canceled { task_id: String },
}

/// Whether an error observed during polling is worth retrying.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Network failure, 5xx, or rate limit. Retried under the poll budget.
    Transient,
    /// Retrying would never succeed. Surfaced immediately.
    Permanent,
}

impl ClientError {
    /// Classifies this error for the polling retry loop.
    ///
    /// Network-level failures and server-side conditions (5xx, 429) are
    /// transient. Everything else, including other 4xx statuses and
    /// malformed payloads, is permanent.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Request(err) => {
                if err.is_builder() {
                    RetryClass::Permanent
                } else {
                    RetryClass::Transient
                }
            }
            Self::HttpStatus { status, .. } => {
                if status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS {
                    RetryClass::Transient
                } else {
                    RetryClass::Permanent
                }
            }
            _ => RetryClass::Permanent,
        }
    }

    /// Returns the server-provided `Retry-After` hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
