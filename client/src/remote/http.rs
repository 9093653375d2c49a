//! REST implementation of the task service.

use super::{CreateTaskRequest, RemoteError, RemoteTaskService};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tasksync_engine::{Task, User};

/// Task service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTaskService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTaskService {
    /// Create a service rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = check_status(request.send().await.map_err(classify)?).await?;
        response.json::<T>().await.map_err(classify)
    }
}

impl RemoteTaskService for HttpTaskService {
    async fn list_tasks(&self, page: u32, limit: u32) -> Result<Vec<Task>, RemoteError> {
        let request = self.client.get(self.url("/tasks")).query(&[
            ("page", page.to_string()),
            ("limit", limit.to_string()),
            ("sortBy", "createdAt".to_string()),
            ("order", "desc".to_string()),
        ]);
        self.fetch(request).await
    }

    async fn create_task(&self, request: &CreateTaskRequest) -> Result<Task, RemoteError> {
        let request = self.client.post(self.url("/tasks")).json(request);
        self.fetch(request).await
    }

    async fn update_task(&self, task: &Task) -> Result<Task, RemoteError> {
        let request = self
            .client
            .put(self.url(&format!("/tasks/{}", task.id)))
            .json(task);
        self.fetch(request).await
    }

    async fn delete_task(&self, id: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.url(&format!("/tasks/{id}")))
            .send()
            .await
            .map_err(classify)?;
        check_status(response).await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, RemoteError> {
        let request = self
            .client
            .get(self.url("/users"))
            .query(&[("sortBy", "name"), ("order", "asc")]);
        self.fetch(request).await
    }
}

/// Turn a non-success status into the matching error.
async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body))
}

fn status_error(status: StatusCode, body: String) -> RemoteError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body
    };

    if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT {
        RemoteError::Rejected {
            status: status.as_u16(),
            message,
        }
    } else {
        RemoteError::Unavailable(format!("{}: {}", status.as_u16(), message))
    }
}

/// Classify a transport-level failure.
fn classify(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Unavailable("request timed out".to_string())
    } else if err.is_decode() {
        RemoteError::Unavailable(format!("invalid response body: {err}"))
    } else {
        RemoteError::NetworkUnavailable(err.to_string())
    }
}
