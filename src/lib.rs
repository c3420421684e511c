//! Rust client library for the Anvil data-orchestration management REST API.
//!
//! Public API layers:
//! - [`ApiClient`]/[`BlockingApiClient`]: generic JSON HTTP clients that
//!   understand the appliance's session cookies and deferred-task responses.
//! - [`AnvilClient`]/[`BlockingAnvilClient`]: catalog-driven operation
//!   clients with login, version verification, and automatic task polling.
//! - [`wait_for_task`]/[`wait_for_task_blocking`]: the task poller, usable
//!   against any [`TaskQuery`]/[`BlockingTaskQuery`] source.
//! - [`ClientError`]: unified error type used by all clients; polling
//!   outcomes (timeout, server-side failure, cancellation) are distinct
//!   variants so callers can branch on them.
//!
//! Mutating endpoints may answer `202 Accepted` with a `Location` header
//! instead of a result; the task layer turns that into a [`TaskHandle`] and
//! polls it with exponential backoff until the task reaches a terminal
//! state. See [`PollPolicy`] for the knobs and their defaults.

mod anvil_client;
mod blocking_client;
mod blocking_poll;
pub mod catalog;
mod client;
mod error;
mod model;
mod poll;
mod task;

/// Catalog-backed async appliance client.
pub use anvil_client::{AnvilClient, BlockingAnvilClient, SDK_VERSION};
/// Generic blocking JSON REST client.
pub use blocking_client::BlockingApiClient;
/// Blocking task poller and its cancellation flag.
pub use blocking_poll::{
    BlockingTaskQuery, CancelFlag, wait_for_task_blocking, wait_for_task_blocking_with_cancel,
};
/// Endpoint catalog types.
pub use catalog::EndpointDefinition;
/// Generic async JSON REST client.
pub use client::{ApiClient, RawResponse};
/// Error type returned by all client operations.
pub use error::{ClientError, RetryClass};
/// Typed resource models.
pub use model::{Node, SoftwareVersion};
/// Async task poller, policy, and status-source trait.
pub use poll::{PollPolicy, TaskQuery, wait_for_task, wait_for_task_with_cancel};
/// Task data model.
pub use task::{Submission, TaskHandle, TaskReport, TaskState};
