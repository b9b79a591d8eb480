//! GitHub Actions backend
//!
//! Triggers a `workflow_dispatch` carrying the job id as the `job_id` input.
//! The workflow is expected to put that id in its run name so status webhooks
//! can be correlated back to the job.

use crate::backend::{DispatchReceipt, ExecutionBackend, InstallationTokens};
use crate::config::{GithubAppConfig, JobAgentConfig};
use crate::error::BackendError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use rudder_types::{Job, JobAgentKind};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct Repository {
    default_branch: String,
}

/// Dispatches jobs as GitHub Actions workflow runs
pub struct GithubBackend {
    client: reqwest::Client,
    api_base: String,
    tokens: Arc<dyn InstallationTokens>,
    retry: RetryPolicy,
}

impl GithubBackend {
    pub fn new(tokens: Arc<dyn InstallationTokens>) -> Result<Self, BackendError> {
        Self::with_timeout(tokens, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Backend whose every request is bounded by `timeout`
    pub fn with_timeout(
        tokens: Arc<dyn InstallationTokens>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            tokens,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn repo_url(&self, config: &GithubAppConfig) -> String {
        format!("{}/repos/{}/{}", self.api_base, config.owner, config.repo)
    }

    async fn default_branch(
        &self,
        token: &str,
        config: &GithubAppConfig,
    ) -> Result<String, BackendError> {
        let url = self.repo_url(config);
        let repository: Repository = self
            .retry
            .run("github.get_repository", || async {
                let response = self
                    .client
                    .get(&url)
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .header(ACCEPT, GITHUB_ACCEPT)
                    .header(USER_AGENT, "rudder")
                    .send()
                    .await?;
                Ok::<_, BackendError>(check(response).await?.json::<Repository>().await?)
            })
            .await?;
        Ok(repository.default_branch)
    }

    async fn dispatch_workflow(
        &self,
        token: &str,
        config: &GithubAppConfig,
        git_ref: &str,
        job: &Job,
    ) -> Result<(), BackendError> {
        let url = format!(
            "{}/actions/workflows/{}/dispatches",
            self.repo_url(config),
            config.workflow_id
        );
        let body = json!({
            "ref": git_ref,
            "inputs": { "job_id": job.id.to_string() },
        });

        self.retry
            .run("github.dispatch_workflow", || async {
                let response = self
                    .client
                    .post(&url)
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .header(ACCEPT, GITHUB_ACCEPT)
                    .header(USER_AGENT, "rudder")
                    .json(&body)
                    .send()
                    .await?;
                check(response).await?;
                Ok::<_, BackendError>(())
            })
            .await
    }
}

#[async_trait]
impl ExecutionBackend for GithubBackend {
    fn kind(&self) -> JobAgentKind {
        JobAgentKind::GithubApp
    }

    #[instrument(skip(self, job, config), fields(job_id = %job.id))]
    async fn dispatch(
        &self,
        job: &Job,
        config: &JobAgentConfig,
    ) -> Result<DispatchReceipt, BackendError> {
        let JobAgentConfig::GithubApp(config) = config else {
            return Err(BackendError::InvalidConfig(format!(
                "github backend cannot run {} agents",
                config.kind()
            )));
        };

        let token = self.tokens.installation_token(config.installation_id).await?;
        let git_ref = match &config.git_ref {
            Some(git_ref) => git_ref.clone(),
            None => {
                let branch = self.default_branch(&token, config).await?;
                debug!(branch = %branch, "Using repository default branch");
                branch
            }
        };

        self.dispatch_workflow(&token, config, &git_ref, job).await?;
        info!(
            owner = %config.owner,
            repo = %config.repo,
            workflow = %config.workflow_id,
            git_ref = %git_ref,
            "Workflow dispatched"
        );
        Ok(DispatchReceipt::in_progress(format!(
            "Dispatched workflow {} on {}/{}@{}",
            config.workflow_id, config.owner, config.repo, git_ref
        )))
    }
}

/// Turn a non-success response into an error carrying GitHub's message
async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());
    Err(BackendError::Http {
        status: status.as_u16(),
        message,
    })
}
