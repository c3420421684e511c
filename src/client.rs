use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

use crate::poll::TaskQuery;
use crate::task::{Submission, TaskHandle, TaskReport};
use crate::{ClientError, PollPolicy};

/// Response metadata the task layer needs in addition to the JSON body.
///
/// Produced by [`ApiClient::send`] for successful responses only; error
/// statuses are turned into [`ClientError::HttpStatus`] before this type is
/// built.
#[derive(Clone, Debug)]
pub struct RawResponse {
    /// HTTP status of the response.
    pub status: StatusCode,
    /// `Location` header, set when the server created a background task.
    pub location: Option<String>,
    /// Parsed `Retry-After` header in seconds, when present.
    pub retry_after: Option<Duration>,
    /// JSON-decoded body, [`Value::Null`] for empty bodies.
    pub body: Value,
}

/// Generic async JSON client for the Anvil management API.
///
/// The client keeps a cookie store because the appliance uses session-cookie
/// authentication rather than OAuth. Appliances commonly ship self-signed
/// certificates; [`Self::accepting_invalid_certs`] opts into trusting them.
#[derive(Clone, Debug)]
pub struct ApiClient {
    base_url: Url,
    accept_invalid_certs: bool,
    http: reqwest::Client,
}

impl ApiClient {
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
    /// All cookies, including the login session, are discarded. The client
    /// may keep being used; the next login opens a fresh session.
    pub fn reset_session(&mut self) -> Result<(), ClientError> {
        self.http = build_http(self.accept_invalid_certs)?;
        Ok(())
    }

    /// Sends a `GET` request and parses the response as JSON.
    pub async fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        self.request_json(Method::GET, path, None).await
    }

    /// Sends a `GET` request with query parameters and parses the response as JSON.
    pub async fn get_json_with_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, ClientError> {
        self.request_json_with_query(Method::GET, path, query, None)
            .await
    }

    /// Sends a `POST` request with a JSON body and parses the response as JSON.
    pub async fn post_json(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.request_json(Method::POST, path, Some(body)).await
    }

    /// Sends a `POST` request with a form-encoded body and parses the
    /// response as JSON.
    ///
    /// The login endpoint takes form encoding rather than JSON.
    pub async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<Value, ClientError> {
        let url = self.build_url(path)?;
        tracing::debug!(method = "POST", url = %url, "sending form request");
        let response = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;
        Ok(read_response(response).await?.body)
    }

    /// Sends a `PUT` request with a JSON body and parses the response as JSON.
    pub async fn put_json(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.request_json(Method::PUT, path, Some(body)).await
    }

    /// Sends a `DELETE` request and parses the response as JSON.
    pub async fn delete_json(&self, path: &str) -> Result<Value, ClientError> {
        self.request_json(Method::DELETE, path, None).await
    }

    /// Sends a request and parses the response as JSON.
    ///
    /// Use [`Self::request_json_with_query`] when query parameters are needed.
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.request_json_with_query(method, path, &[], body).await
    }

    /// Sends a request with query parameters and parses the response as JSON.
    ///
    /// Returns [`Value::Null`] for successful responses with an empty body.
    pub async fn request_json_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        Ok(self.send(method, path, query, body).await?.body)
    }

    /// Sends a request and returns the decoded body together with the
    /// response metadata the task layer inspects (`Location`, `Retry-After`).
    ///
    /// Non-success statuses become [`ClientError::HttpStatus`], carrying the
    /// raw response payload and any `Retry-After` hint.
    pub async fn send(
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

        let response = request.send().await?;
        read_response(response).await
    }

    /// Sends a mutating request, detecting whether the server deferred it to
    /// a background task.
    ///
    /// A `202 Accepted` response with a `Location` header yields
    /// [`Submission::Accepted`]; anything else completes synchronously as
    /// [`Submission::Done`].
    pub async fn submit(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Submission, ClientError> {
        let raw = self.send(method, path, query, body).await?;
        match raw.location {
            Some(location) if raw.status == StatusCode::ACCEPTED => {
                let handle = TaskHandle::from_location(location);
                tracing::debug!(task = handle.task_id(), "server deferred request to a task");
                Ok(Submission::Accepted(handle))
            }
            _ => Ok(Submission::Done(raw.body)),
        }
    }

    /// Polls a task to a terminal state under `policy`.
    ///
    /// Convenience wrapper around [`crate::wait_for_task`] using this client
    /// as the status source.
    pub async fn wait_for_task(
        &self,
        handle: &TaskHandle,
        policy: &PollPolicy,
    ) -> Result<TaskReport, ClientError> {
        crate::poll::wait_for_task(self, handle, policy).await
    }

    fn build_url(&self, path: &str) -> Result<Url, ClientError> {
        let relative = path.trim_start_matches('/');
        self.base_url
            .join(relative)
            .map_err(|_| ClientError::InvalidPath(path.to_owned()))
    }
}

#[async_trait]
impl TaskQuery for ApiClient {
    async fn fetch_report(&self, handle: &TaskHandle) -> Result<TaskReport, ClientError> {
        let payload = self.get_json(handle.status_uri()).await?;
        TaskReport::from_value(&payload)
    }
}

fn build_http(accept_invalid_certs: bool) -> Result<reqwest::Client, ClientError> {
    Ok(reqwest::Client::builder()
        .cookie_store(true)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()?)
}

async fn read_response(response: reqwest::Response) -> Result<RawResponse, ClientError> {
    let status = response.status();
    let location = header_string(&response, header::LOCATION);
    let retry_after = header_string(&response, header::RETRY_AFTER)
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let payload = response.text().await?;

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

fn header_string(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
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
