use std::time::Duration;

use reqwest::header;
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

use crate::blocking_poll::BlockingTaskQuery;
use crate::client::RawResponse;
use crate::task::{Submission, TaskHandle, TaskReport};
use crate::{ClientError, PollPolicy};

/// Generic blocking JSON client for the Anvil management API.
///
/// This is the synchronous counterpart of [`crate::ApiClient`].
#[derive(Debug)]
pub struct BlockingApiClient {
    base_url: Url,
    accept_invalid_certs: bool,
    http: reqwest::blocking::Client,
}

impl BlockingApiClient {
    /// Creates a new client with the given base URL.
    ///
    /// The URL is normalized to include a trailing slash, so relative endpoint
    /// paths join correctly.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url.as_ref())
            .map_err(|_| ClientError::InvalidBaseUrl(base_url.as_ref().to_owned()))?;

        Ok(Self {
            base_url: ensure_trailing_slash(parsed),
            accept_invalid_certs: false,
            http: build_http(false)?,
        })
    }

    /// Returns a new client that trusts self-signed server certificates.
    pub fn accepting_invalid_certs(mut self) -> Result<Self, ClientError> {
        self.accept_invalid_certs = true;
        self.http = build_http(true)?;
        Ok(self)
    }

    /// Drops the current session by replacing the underlying HTTP client.
    ///
    /// All cookies, including the login session, are discarded.
    pub fn reset_session(&mut self) -> Result<(), ClientError> {
        self.http = build_http(self.accept_invalid_certs)?;
        Ok(())
    }

    /// Sends a `GET` request and parses the response as JSON.
    pub fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        self.request_json(Method::GET, path, None)
    }

    /// Sends a `GET` request with query parameters and parses the response as JSON.
    pub fn get_json_with_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, ClientError> {
        self.request_json_with_query(Method::GET, path, query, None)
    }

    /// Sends a `POST` request with a JSON body and parses the response as JSON.
    pub fn post_json(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.request_json(Method::POST, path, Some(body))
    }

    /// Sends a `POST` request with a form-encoded body and parses the
    /// response as JSON.
    ///
    /// The login endpoint takes form encoding rather than JSON.
    pub fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value, ClientError> {
        let url = self.build_url(path)?;
        tracing::debug!(method = "POST", url = %url, "sending form request");
        let response = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .form(form)
            .send()?;
        Ok(read_response(response)?.body)
    }

    /// Sends a `PUT` request with a JSON body and parses the response as JSON.
    pub fn put_json(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.request_json(Method::PUT, path, Some(body))
    }

    /// Sends a `DELETE` request and parses the response as JSON.
    pub fn delete_json(&self, path: &str) -> Result<Value, ClientError> {
        self.request_json(Method::DELETE, path, None)
    }

    /// Sends a request and parses the response as JSON.
    ///
    /// Use [`Self::request_json_with_query`] when query parameters are needed.
    pub fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.request_json_with_query(method, path, &[], body)
    }

    /// Sends a request with query parameters and parses the response as JSON.
    ///
    /// Returns [`Value::Null`] for successful responses with an empty body.
    pub fn request_json_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        Ok(self.send(method, path, query, body)?.body)
    }

    /// Sends a request and returns the decoded body together with the
    /// response metadata the task layer inspects (`Location`, `Retry-After`).
    pub fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<RawResponse, ClientError> {
        let url = self.build_url(path)?;
        tracing::debug!(method = %method, url = %url, "sending request");

        let mut request = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/json");

        if !query.is_empty() {
            request = request.query(query);
        }

        if let Some(json_body) = body {
            request = request.json(&json_body);
        }

        let response = request.send()?;
        read_response(response)
    }

    /// Sends a mutating request, detecting whether the server deferred it to
    /// a background task.
    pub fn submit(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Submission, ClientError> {
        let raw = self.send(method, path, query, body)?;
        match raw.location {
            Some(location) if raw.status == StatusCode::ACCEPTED => {
                let handle = TaskHandle::from_location(location);
                tracing::debug!(task = handle.task_id(), "server deferred request to a task");
                Ok(Submission::Accepted(handle))
            }
            _ => Ok(Submission::Done(raw.body)),
        }
    }

    /// Polls a task to a terminal state under `policy`, blocking the
    /// current thread between queries.
    pub fn wait_for_task(
        &self,
        handle: &TaskHandle,
        policy: &PollPolicy,
    ) -> Result<TaskReport, ClientError> {
        crate::blocking_poll::wait_for_task_blocking(self, handle, policy)
    }

    fn build_url(&self, path: &str) -> Result<Url, ClientError> {
        let relative = path.trim_start_matches('/');
        self.base_url
            .join(relative)
            .map_err(|_| ClientError::InvalidPath(path.to_owned()))
    }
}

impl BlockingTaskQuery for BlockingApiClient {
    fn fetch_report(&self, handle: &TaskHandle) -> Result<TaskReport, ClientError> {
        let payload = self.get_json(handle.status_uri())?;
        TaskReport::from_value(&payload)
    }
}

fn build_http(accept_invalid_certs: bool) -> Result<reqwest::blocking::Client, ClientError> {
    Ok(reqwest::blocking::Client::builder()
        .cookie_store(true)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()?)
}

fn read_response(response: reqwest::blocking::Response) -> Result<RawResponse, ClientError> {
    let status = response.status();
    let location = header_string(&response, header::LOCATION);
    let retry_after = header_string(&response, header::RETRY_AFTER)
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let payload = response.text()?;

    tracing::debug!(status = %status, "response received");

    if !status.is_success() {
        return Err(ClientError::HttpStatus {
            status,
            retry_after,
            body: payload,
        });
    }

    let body = if payload.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&payload)?
    };

    Ok(RawResponse {
        status,
        location,
        retry_after,
        body,
    })
}

fn header_string(
    response: &reqwest::blocking::Response,
    name: header::HeaderName,
) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_owned();
        path.push('/');
        url.set_path(&path);
    }
    url
}
