//! Typed job agent configuration
//!
//! A job carries the agent's base config deep-merged with the deployment's
//! override as raw JSON. It is parsed into one of these shapes at the dispatch
//! boundary; nothing past this point reads untyped config.

use crate::error::BackendError;
use rudder_types::JobAgentKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parsed config of one job agent kind
#[derive(Debug, Clone, PartialEq)]
pub enum JobAgentConfig {
    GithubApp(GithubAppConfig),
    Webhook(WebhookConfig),
    Kubernetes(KubernetesConfig),

    /// Unknown kinds keep their JSON untouched
    Custom {
        kind: String,
        config: serde_json::Value,
    },
}

impl JobAgentConfig {
    /// Parse merged config for `kind`
    pub fn parse(kind: &JobAgentKind, config: &serde_json::Value) -> Result<Self, BackendError> {
        let parsed = match kind {
            JobAgentKind::GithubApp => Self::GithubApp(from_value(kind, config)?),
            JobAgentKind::Webhook => Self::Webhook(from_value(kind, config)?),
            JobAgentKind::Kubernetes => Self::Kubernetes(from_value(kind, config)?),
            JobAgentKind::Custom(name) => Self::Custom {
                kind: name.clone(),
                config: config.clone(),
            },
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn kind(&self) -> JobAgentKind {
        match self {
            Self::GithubApp(_) => JobAgentKind::GithubApp,
            Self::Webhook(_) => JobAgentKind::Webhook,
            Self::Kubernetes(_) => JobAgentKind::Kubernetes,
            Self::Custom { kind, .. } => JobAgentKind::Custom(kind.clone()),
        }
    }

    fn validate(&self) -> Result<(), BackendError> {
        match self {
            Self::GithubApp(github) => {
                if github.owner.is_empty() || github.repo.is_empty() {
                    return Err(BackendError::InvalidConfig(
                        "github-app agent requires owner and repo".into(),
                    ));
                }
            }
            Self::Webhook(webhook) => {
                if !(webhook.url.starts_with("http://") || webhook.url.starts_with("https://")) {
                    return Err(BackendError::InvalidConfig(format!(
                        "webhook url must be http(s): {}",
                        webhook.url
                    )));
                }
            }
            Self::Kubernetes(_) | Self::Custom { .. } => {}
        }
        Ok(())
    }
}

fn from_value<T: serde::de::DeserializeOwned>(
    kind: &JobAgentKind,
    config: &serde_json::Value,
) -> Result<T, BackendError> {
    T::deserialize(config)
        .map_err(|e| BackendError::InvalidConfig(format!("{} config: {}", kind, e)))
}

/// GitHub Actions workflow dispatch through an app installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubAppConfig {
    pub installation_id: u64,
    pub owner: String,
    pub repo: String,
    pub workflow_id: WorkflowRef,

    /// Branch or tag; the repository default branch when absent
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
}

/// Workflow id or workflow file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowRef {
    Id(u64),
    File(String),
}

impl fmt::Display for WorkflowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::File(file) => f.write_str(file),
        }
    }
}

/// Plain HTTP callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Job manifest template
    #[serde(default)]
    pub manifest: serde_json::Value,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_github() {
        let config = JobAgentConfig::parse(
            &JobAgentKind::GithubApp,
            &json!({
                "installation_id": 42,
                "owner": "acme",
                "repo": "deploys",
                "workflow_id": "deploy.yml",
                "ref": "release"
            }),
        )
        .unwrap();

        match config {
            JobAgentConfig::GithubApp(github) => {
                assert_eq!(github.workflow_id, WorkflowRef::File("deploy.yml".into()));
                assert_eq!(github.git_ref.as_deref(), Some("release"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = JobAgentConfig::parse(&JobAgentKind::GithubApp, &json!({ "owner": "acme" }))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidConfig(_)));

        let err = JobAgentConfig::parse(&JobAgentKind::Webhook, &json!({ "url": "ftp://x" }))
            .unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn test_custom_passthrough() {
        let raw = json!({ "anything": [1, 2] });
        let config =
            JobAgentConfig::parse(&JobAgentKind::Custom("argo".into()), &raw).unwrap();
        assert_eq!(config.kind(), JobAgentKind::Custom("argo".into()));
        assert_eq!(
            config,
            JobAgentConfig::Custom {
                kind: "argo".into(),
                config: raw
            }
        );
    }

    #[test]
    fn test_kubernetes_defaults() {
        let config = JobAgentConfig::parse(&JobAgentKind::Kubernetes, &json!({})).unwrap();
        match config {
            JobAgentConfig::Kubernetes(k8s) => assert_eq!(k8s.namespace, "default"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
