//! HTTP scheduler client.
//!
//! Submissions and cancellations are JSON `POST`s to
//! `{base_url}{endpoint}`. Any 2xx answer counts as acceptance; the job
//! identifier is read from `job_id` (or `task_id`) in the response body when
//! one is present.

use crate::task::{
    domain::JobId,
    ports::{
        CancelRequest, SchedulerClient, SchedulerError, SchedulerResult, SubmitReceipt,
        SubmitRequest,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Connection settings for [`HttpSchedulerClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSchedulerConfig {
    /// Scheduler base URL, with or without a trailing slash.
    pub base_url: String,
    /// Path receiving submissions.
    pub task_endpoint: String,
    /// Path receiving cancellations.
    pub cancel_endpoint: String,
    /// Upper bound on a single call.
    pub request_timeout: Duration,
}

impl HttpSchedulerConfig {
    /// Creates settings for `base_url` with the default endpoints and timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            task_endpoint: "/task".to_owned(),
            cancel_endpoint: "/cancel".to_owned(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Joins the base URL and an endpoint path with exactly one slash.
    #[must_use]
    pub fn url_for(&self, endpoint: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if endpoint.starts_with('/') {
            format!("{base}{endpoint}")
        } else {
            format!("{base}/{endpoint}")
        }
    }
}

/// Scheduler client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSchedulerClient {
    client: reqwest::Client,
    config: HttpSchedulerConfig,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerAck {
    job_id: Option<String>,
    task_id: Option<String>,
}

impl HttpSchedulerClient {
    /// Builds a client with the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Configuration`] when the HTTP client cannot
    /// be constructed.
    pub fn new(config: HttpSchedulerConfig) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| {
                SchedulerError::Configuration(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self { client, config })
    }

    /// Returns the client settings.
    #[must_use]
    pub const fn config(&self) -> &HttpSchedulerConfig {
        &self.config
    }

    async fn post<P: Serialize + Sync>(&self, endpoint: &str, payload: &P) -> SchedulerResult<String> {
        let url = self.config.url_for(endpoint);
        debug!(%url, "calling scheduler");

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|err| self.transport_error(&url, &err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| self.transport_error(&url, &err))?;
        if status.is_success() {
            return Ok(body);
        }

        error!(%url, status = status.as_u16(), response = %body, "scheduler rejected request");
        Err(SchedulerError::Rejected {
            url,
            status: status.as_u16(),
            body,
        })
    }

    fn transport_error(&self, url: &str, err: &reqwest::Error) -> SchedulerError {
        if err.is_timeout() {
            error!(%url, "scheduler request timed out");
            return SchedulerError::Timeout {
                after: self.config.request_timeout,
            };
        }
        error!(%url, error = %err, "scheduler unreachable");
        SchedulerError::Unavailable {
            url: url.to_owned(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl SchedulerClient for HttpSchedulerClient {
    async fn submit(&self, request: &SubmitRequest) -> SchedulerResult<SubmitReceipt> {
        let body = self.post(&self.config.task_endpoint, request).await?;
        Ok(SubmitReceipt {
            job_id: parse_job_id(&body),
        })
    }

    async fn cancel(&self, request: &CancelRequest) -> SchedulerResult<()> {
        self.post(&self.config.cancel_endpoint, request).await?;
        Ok(())
    }
}

fn parse_job_id(body: &str) -> Option<JobId> {
    let ack: SchedulerAck = serde_json::from_str(body).ok()?;
    ack.job_id
        .or(ack.task_id)
        .and_then(|raw| JobId::new(raw).ok())
}
