//! Execution backend seam

use crate::config::JobAgentConfig;
use crate::error::BackendError;
use async_trait::async_trait;
use rudder_types::{Job, JobAgentKind, JobStatus, JobStatusUpdate};
use std::collections::HashMap;

/// What a backend reports after accepting a job
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReceipt {
    /// Status the job moves to; an awaiting status, never terminal
    pub status: JobStatus,
    pub external_id: Option<String>,
    pub message: Option<String>,
}

impl DispatchReceipt {
    pub fn in_progress(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::InProgress,
            external_id: None,
            message: Some(message.into()),
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn to_update(&self) -> JobStatusUpdate {
        JobStatusUpdate {
            status: self.status,
            message: self.message.clone(),
            external_id: self.external_id.clone(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Something that can run a job
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Agent kind this backend serves
    fn kind(&self) -> JobAgentKind;

    /// Hand the job to the external system
    async fn dispatch(&self, job: &Job, config: &JobAgentConfig)
        -> Result<DispatchReceipt, BackendError>;
}

/// Supplies installation-scoped GitHub tokens
#[async_trait]
pub trait InstallationTokens: Send + Sync {
    async fn installation_token(&self, installation_id: u64) -> Result<String, BackendError>;
}

/// Tokens from configuration, with an optional fallback for any installation
#[derive(Default, Clone)]
pub struct StaticInstallationTokens {
    fallback: Option<String>,
    per_installation: HashMap<u64, String>,
}

impl StaticInstallationTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, token: impl Into<String>) -> Self {
        self.fallback = Some(token.into());
        self
    }

    pub fn with_installation(mut self, installation_id: u64, token: impl Into<String>) -> Self {
        self.per_installation.insert(installation_id, token.into());
        self
    }
}

impl std::fmt::Debug for StaticInstallationTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticInstallationTokens")
            .field("fallback", &self.fallback.is_some())
            .field("installations", &self.per_installation.len())
            .finish()
    }
}

#[async_trait]
impl InstallationTokens for StaticInstallationTokens {
    async fn installation_token(&self, installation_id: u64) -> Result<String, BackendError> {
        self.per_installation
            .get(&installation_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                BackendError::Credentials(format!(
                    "no token for GitHub installation {}",
                    installation_id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_tokens() {
        let tokens = StaticInstallationTokens::new().with_installation(7, "ghs_seven");
        assert_eq!(tokens.installation_token(7).await.unwrap(), "ghs_seven");
        assert!(matches!(
            tokens.installation_token(8).await,
            Err(BackendError::Credentials(_))
        ));

        let tokens = tokens.with_fallback("ghs_any");
        assert_eq!(tokens.installation_token(8).await.unwrap(), "ghs_any");
        assert!(!format!("{:?}", tokens).contains("ghs_"));
    }

    #[test]
    fn test_receipt_update() {
        let update = DispatchReceipt::in_progress("dispatched")
            .with_external_id("run-1")
            .to_update();
        assert_eq!(update.status, JobStatus::InProgress);
        assert_eq!(update.external_id.as_deref(), Some("run-1"));
    }
}
