//! Plain HTTP callback backend
//!
//! POSTs the job to the configured URL. A JSON response may name the external
//! run with an `external_id` field.

use crate::backend::{DispatchReceipt, ExecutionBackend};
use crate::config::JobAgentConfig;
use crate::error::BackendError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use rudder_types::{Job, JobAgentKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    job_id: String,
    release_id: String,
    config: &'a serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookAck {
    #[serde(default)]
    external_id: Option<String>,
}

pub struct WebhookBackend {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl WebhookBackend {
    pub fn new() -> Result<Self, BackendError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl ExecutionBackend for WebhookBackend {
    fn kind(&self) -> JobAgentKind {
        JobAgentKind::Webhook
    }

    #[instrument(skip(self, job, config), fields(job_id = %job.id))]
    async fn dispatch(
        &self,
        job: &Job,
        config: &JobAgentConfig,
    ) -> Result<DispatchReceipt, BackendError> {
        let JobAgentConfig::Webhook(webhook) = config else {
            return Err(BackendError::InvalidConfig(format!(
                "webhook backend cannot run {} agents",
                config.kind()
            )));
        };

        let payload = WebhookPayload {
            job_id: job.id.to_string(),
            release_id: job.release_id.to_string(),
            config: &job.job_agent_config,
        };

        let ack = self
            .retry
            .run("webhook.dispatch", || async {
                let mut request = self.client.post(&webhook.url).json(&payload);
                for (name, value) in &webhook.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(BackendError::Http {
                        status: status.as_u16(),
                        message,
                    });
                }
                // Empty or non-JSON bodies are a plain acknowledgement
                let body = response.bytes().await?;
                Ok(serde_json::from_slice::<WebhookAck>(&body).unwrap_or_default())
            })
            .await?;

        info!(url = %webhook.url, "Job posted to webhook");
        let receipt = DispatchReceipt::in_progress(format!("Posted to {}", webhook.url));
        Ok(match ack.external_id {
            Some(external_id) => receipt.with_external_id(external_id),
            None => receipt,
        })
    }
}
