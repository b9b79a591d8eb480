//! Rudder Dispatch - hands jobs to execution backends
//!
//! Outbound, [`JobDispatcher`] parses the job's merged agent config into a
//! [`JobAgentConfig`] and calls the [`ExecutionBackend`] registered for the
//! agent kind. Inbound, [`correlation`] maps GitHub `workflow_run` webhooks
//! back onto job status updates.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod backend;
pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod github;
pub mod retry;
pub mod webhook;

pub use backend::{DispatchReceipt, ExecutionBackend, InstallationTokens, StaticInstallationTokens};
pub use config::{GithubAppConfig, JobAgentConfig, KubernetesConfig, WebhookConfig, WorkflowRef};
pub use correlation::{
    extract_job_id, map_status, CorrelatedUpdate, WorkflowRun, WorkflowRunEvent,
};
pub use dispatcher::JobDispatcher;
pub use error::{BackendError, DispatchError, Result};
pub use github::{GithubBackend, DEFAULT_API_BASE};
pub use retry::RetryPolicy;
pub use webhook::WebhookBackend;
