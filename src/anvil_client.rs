use std::cmp::Ordering;

use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::blocking_poll::CancelFlag;
use crate::catalog::{self, EndpointDefinition};
use crate::model::Node;
use crate::task::{Submission, TaskHandle, TaskReport, TaskState};
use crate::{ApiClient, BlockingApiClient, ClientError, PollPolicy};

/// Appliance software generation this SDK tracks.
///
/// Login-time verification refuses appliances older than this; newer
/// appliances keep the management API backward compatible.
pub const SDK_VERSION: &str = "5.1.18";

/// High-level async client for an Anvil appliance.
///
/// Wraps [`ApiClient`] with the endpoint catalog, session login, and
/// automatic polling of deferred tasks. Credentials and session state live
/// in this value; independent clients with independent sessions can coexist
/// in one process.
#[derive(Clone, Debug)]
pub struct AnvilClient {
    inner: ApiClient,
    logged_in: bool,
}

impl AnvilClient {
    /// Creates a client for the appliance at `address` on `port`.
    pub fn new(address: &str, port: u16) -> Result<Self, ClientError> {
        Self::from_base_url(format!("https://{address}:{port}/"))
    }

    /// Creates a client for the appliance at `address` on the default
    /// management port.
    pub fn from_address(address: &str) -> Result<Self, ClientError> {
        Self::new(address, catalog::DEFAULT_PORT)
    }

    /// Creates a client with an explicit base URL.
    pub fn from_base_url(base_url: impl AsRef<str>) -> Result<Self, ClientError> {
        Ok(Self {
            inner: ApiClient::new(base_url)?,
            logged_in: false,
        })
    }

    /// Returns a new client that trusts the appliance's self-signed
    /// certificate.
    pub fn accepting_invalid_certs(mut self) -> Result<Self, ClientError> {
        self.inner = self.inner.accepting_invalid_certs()?;
        Ok(self)
    }

    /// Returns the hand-maintained endpoint catalog.
    pub fn operations() -> &'static [EndpointDefinition] {
        catalog::ENDPOINTS
    }

    /// Whether a login has succeeded on this client.
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Logs in to the appliance, establishing a session cookie.
    ///
    /// The login endpoint takes form-encoded credentials rather than JSON.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<Value, ClientError> {
        let endpoint = catalog::find_endpoint("login")?;
        let response = self
            .inner
            .post_form(
                endpoint.path_template,
                &[("username", username), ("password", password)],
            )
            .await?;
        self.logged_in = true;
        tracing::debug!(username, "login succeeded");
        Ok(response)
    }

    /// Logs in and verifies the appliance software is not older than
    /// [`SDK_VERSION`].
    pub async fn login_verified(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<Value, ClientError> {
        let response = self.login(username, password).await?;
        self.verify_appliance_version().await?;
        Ok(response)
    }

    /// Compares the first node's reported software version against
    /// [`SDK_VERSION`], failing when the appliance is older.
    pub async fn verify_appliance_version(&self) -> Result<(), ClientError> {
        let nodes = self.list_nodes().await?;
        if let Some(sw_version) = nodes.iter().find_map(|node| node.sw_version.as_ref()) {
            if version_ordering(&sw_version.version, SDK_VERSION) == Ordering::Less {
                return Err(ClientError::VersionMismatch {
                    sdk_version: SDK_VERSION.to_owned(),
                    appliance_version: sw_version.version.clone(),
                });
            }
        }
        Ok(())
    }

    /// Ends the session, discarding the session cookie.
    ///
    /// The client may keep being used; the next [`Self::login`] opens a
    /// fresh session.
    pub fn logout(&mut self) -> Result<(), ClientError> {
        if !self.logged_in {
            return Err(ClientError::NotLoggedIn);
        }
        self.inner.reset_session()?;
        self.logged_in = false;
        Ok(())
    }

    /// Sends a request using a raw path and method.
    ///
    /// This bypasses the catalog but keeps the client's session and TLS
    /// configuration.
    pub async fn request_json_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.inner
            .request_json_with_query(method, path, query, body)
            .await
    }

    /// Calls an endpoint by catalog operation id.
    ///
    /// `path_params` replaces `{param}` segments in the endpoint path
    /// template; missing required parameters return
    /// [`ClientError::MissingPathParameter`].
    pub async fn call_operation(
        &self,
        operation_id: &str,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let endpoint = catalog::find_endpoint(operation_id)?;
        let rendered_path = catalog::render_path(endpoint, path_params)?;
        let method = catalog::parse_method(endpoint)?;
        self.inner
            .request_json_with_query(method, &rendered_path, query, body)
            .await
    }

    /// Calls an endpoint by operation id, detecting a deferred task.
    pub async fn submit_operation(
        &self,
        operation_id: &str,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Submission, ClientError> {
        let endpoint = catalog::find_endpoint(operation_id)?;
        let rendered_path = catalog::render_path(endpoint, path_params)?;
        let method = catalog::parse_method(endpoint)?;
        self.inner.submit(method, &rendered_path, query, body).await
    }

    /// Calls an endpoint and, when the server defers it to a task, polls
    /// the task to completion under `policy`.
    ///
    /// Returns the synchronous response body, or the completed task's result
    /// payload ([`Value::Null`] when the task attaches none). A task the
    /// server cancels instead of completing returns
    /// [`ClientError::TaskCanceled`] so it cannot be mistaken for a
    /// no-result success. Use [`Self::submit_operation`] plus
    /// [`Self::wait_for_task`] when the full [`TaskReport`] is needed.
    pub async fn execute(
        &self,
        operation_id: &str,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
        policy: &PollPolicy,
    ) -> Result<Value, ClientError> {
        self.execute_with_cancel(
            operation_id,
            path_params,
            query,
            body,
            policy,
            &CancellationToken::new(),
        )
        .await
    }

    /// [`Self::execute`] with caller-controlled cancellation of the polling
    /// phase.
    pub async fn execute_with_cancel(
        &self,
        operation_id: &str,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<Value, ClientError> {
        match self
            .submit_operation(operation_id, path_params, query, body)
            .await?
        {
            Submission::Done(value) => Ok(value),
            Submission::Accepted(handle) => {
                let report =
                    crate::poll::wait_for_task_with_cancel(&self.inner, &handle, policy, cancel)
                        .await?;
                completed_result(&handle, report)
            }
        }
    }

    /// Polls a task handle to a terminal state under `policy`.
    pub async fn wait_for_task(
        &self,
        handle: &TaskHandle,
        policy: &PollPolicy,
    ) -> Result<TaskReport, ClientError> {
        self.inner.wait_for_task(handle, policy).await
    }

    /// Fetches a single status snapshot for a task by id.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskReport, ClientError> {
        let payload = self
            .call_operation("getTask", &[("task_id", task_id)], &[], None)
            .await?;
        TaskReport::from_value(&payload)
    }

    /// Lists all nodes in the environment as typed records.
    pub async fn list_nodes(&self) -> Result<Vec<Node>, ClientError> {
        let payload = self.call_operation("listNodes", &[], &[], None).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Fetches one node by id as a typed record.
    pub async fn get_node(&self, node_id: &str) -> Result<Node, ClientError> {
        let payload = self
            .call_operation("getNode", &[("node_id", node_id)], &[], None)
            .await?;
        Ok(serde_json::from_value(payload)?)
    }
}

/// High-level blocking client for an Anvil appliance.
///
/// This is the synchronous counterpart of [`AnvilClient`].
#[derive(Debug)]
pub struct BlockingAnvilClient {
    inner: BlockingApiClient,
    logged_in: bool,
}

impl BlockingAnvilClient {
    /// Creates a client for the appliance at `address` on `port`.
    pub fn new(address: &str, port: u16) -> Result<Self, ClientError> {
        Self::from_base_url(format!("https://{address}:{port}/"))
    }

    /// Creates a client for the appliance at `address` on the default
    /// management port.
    pub fn from_address(address: &str) -> Result<Self, ClientError> {
        Self::new(address, catalog::DEFAULT_PORT)
    }

    /// Creates a client with an explicit base URL.
    pub fn from_base_url(base_url: impl AsRef<str>) -> Result<Self, ClientError> {
        Ok(Self {
            inner: BlockingApiClient::new(base_url)?,
            logged_in: false,
        })
    }

    /// Returns a new client that trusts the appliance's self-signed
    /// certificate.
    pub fn accepting_invalid_certs(mut self) -> Result<Self, ClientError> {
        self.inner = self.inner.accepting_invalid_certs()?;
        Ok(self)
    }

    /// Returns the hand-maintained endpoint catalog.
    pub fn operations() -> &'static [EndpointDefinition] {
        catalog::ENDPOINTS
    }

    /// Whether a login has succeeded on this client.
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Logs in to the appliance, establishing a session cookie.
    pub fn login(&mut self, username: &str, password: &str) -> Result<Value, ClientError> {
        let endpoint = catalog::find_endpoint("login")?;
        let response = self.inner.post_form(
            endpoint.path_template,
            &[("username", username), ("password", password)],
        )?;
        self.logged_in = true;
        tracing::debug!(username, "login succeeded");
        Ok(response)
    }

    /// Logs in and verifies the appliance software is not older than
    /// [`SDK_VERSION`].
    pub fn login_verified(&mut self, username: &str, password: &str) -> Result<Value, ClientError> {
        let response = self.login(username, password)?;
        self.verify_appliance_version()?;
        Ok(response)
    }

    /// Compares the first node's reported software version against
    /// [`SDK_VERSION`], failing when the appliance is older.
    pub fn verify_appliance_version(&self) -> Result<(), ClientError> {
        let nodes = self.list_nodes()?;
        if let Some(sw_version) = nodes.iter().find_map(|node| node.sw_version.as_ref()) {
            if version_ordering(&sw_version.version, SDK_VERSION) == Ordering::Less {
                return Err(ClientError::VersionMismatch {
                    sdk_version: SDK_VERSION.to_owned(),
                    appliance_version: sw_version.version.clone(),
                });
            }
        }
        Ok(())
    }

    /// Ends the session, discarding the session cookie.
    pub fn logout(&mut self) -> Result<(), ClientError> {
        if !self.logged_in {
            return Err(ClientError::NotLoggedIn);
        }
        self.inner.reset_session()?;
        self.logged_in = false;
        Ok(())
    }

    /// Sends a request using a raw path and method.
    ///
    /// This bypasses the catalog but keeps the client's session and TLS
    /// configuration.
    pub fn request_json_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.inner
            .request_json_with_query(method, path, query, body)
    }

    /// Calls an endpoint by catalog operation id.
    pub fn call_operation(
        &self,
        operation_id: &str,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let endpoint = catalog::find_endpoint(operation_id)?;
        let rendered_path = catalog::render_path(endpoint, path_params)?;
        let method = catalog::parse_method(endpoint)?;
        self.inner
            .request_json_with_query(method, &rendered_path, query, body)
    }

    /// Calls an endpoint by operation id, detecting a deferred task.
    pub fn submit_operation(
        &self,
        operation_id: &str,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Submission, ClientError> {
        let endpoint = catalog::find_endpoint(operation_id)?;
        let rendered_path = catalog::render_path(endpoint, path_params)?;
        let method = catalog::parse_method(endpoint)?;
        self.inner.submit(method, &rendered_path, query, body)
    }

    /// Calls an endpoint and, when the server defers it to a task, polls
    /// the task to completion under `policy`.
    ///
    /// A task the server cancels instead of completing returns
    /// [`ClientError::TaskCanceled`].
    pub fn execute(
        &self,
        operation_id: &str,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
        policy: &PollPolicy,
    ) -> Result<Value, ClientError> {
        self.execute_with_cancel(
            operation_id,
            path_params,
            query,
            body,
            policy,
            &CancelFlag::new(),
        )
    }

    /// [`Self::execute`] with caller-controlled cancellation of the polling
    /// phase.
    pub fn execute_with_cancel(
        &self,
        operation_id: &str,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
        policy: &PollPolicy,
        cancel: &CancelFlag,
    ) -> Result<Value, ClientError> {
        match self.submit_operation(operation_id, path_params, query, body)? {
            Submission::Done(value) => Ok(value),
            Submission::Accepted(handle) => {
                let report = crate::blocking_poll::wait_for_task_blocking_with_cancel(
                    &self.inner,
                    &handle,
                    policy,
                    cancel,
                )?;
                completed_result(&handle, report)
            }
        }
    }

    /// Polls a task handle to a terminal state under `policy`.
    pub fn wait_for_task(
        &self,
        handle: &TaskHandle,
        policy: &PollPolicy,
    ) -> Result<TaskReport, ClientError> {
        self.inner.wait_for_task(handle, policy)
    }

    /// Fetches a single status snapshot for a task by id.
    pub fn get_task(&self, task_id: &str) -> Result<TaskReport, ClientError> {
        let payload = self.call_operation("getTask", &[("task_id", task_id)], &[], None)?;
        TaskReport::from_value(&payload)
    }

    /// Lists all nodes in the environment as typed records.
    pub fn list_nodes(&self) -> Result<Vec<Node>, ClientError> {
        let payload = self.call_operation("listNodes", &[], &[], None)?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Fetches one node by id as a typed record.
    pub fn get_node(&self, node_id: &str) -> Result<Node, ClientError> {
        let payload = self.call_operation("getNode", &[("node_id", node_id)], &[], None)?;
        Ok(serde_json::from_value(payload)?)
    }
}

/// Extracts the result payload from a task's terminal report.
///
/// The poller hands back `Completed` and server-side `Canceled` reports as
/// `Ok`; only the former carries a result. A canceled task becomes
/// [`ClientError::TaskCanceled`] so callers can tell it apart from a
/// completed task with no result payload.
fn completed_result(handle: &TaskHandle, report: TaskReport) -> Result<Value, ClientError> {
    match report.state {
        TaskState::Canceled => Err(ClientError::TaskCanceled {
            task_id: handle.task_id().to_owned(),
        }),
        _ => Ok(report.result.unwrap_or(Value::Null)),
    }
}

/// Orders two dotted version strings.
///
/// Components are compared numerically when both sides parse as integers,
/// lexicographically otherwise. A shorter version sorts before a longer one
/// with equal leading components.
fn version_ordering(left: &str, right: &str) -> Ordering {
    let mut left_parts = left.split('.');
    let mut right_parts = right.split('.');
    loop {
        match (left_parts.next(), right_parts.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(left_part), Some(right_part)) => {
                let ordering = match (left_part.parse::<u64>(), right_part.parse::<u64>()) {
                    (Ok(left_num), Ok(right_num)) => left_num.cmp(&right_num),
                    _ => left_part.cmp(right_part),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}
