//! Policies governing when and how versions reach release targets
//!
//! A policy applies to every release target matched by one of its targets and
//! contributes rule specs. Rule behaviour lives in `rudder-rules`.

use crate::selector::Condition;
use crate::{ApprovalRecordId, DeploymentVersionId, EnvironmentId, PolicyId, WorkspaceId};
use chrono::{DateTime, NaiveDateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub workspace_id: WorkspaceId,
    pub name: String,

    /// Higher priority policies contribute rules first
    pub priority: i32,

    pub enabled: bool,

    #[serde(default)]
    pub targets: Vec<PolicyTarget>,

    #[serde(default)]
    pub deny_windows: Vec<RecurrenceSpec>,

    pub version_cooldown: Option<CooldownSpec>,

    pub version_selector: Option<Condition>,

    pub rollout: Option<RolloutSpec>,

    #[serde(default)]
    pub approvals: Vec<ApprovalRequirement>,

    pub created_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(workspace_id: WorkspaceId, name: impl Into<String>) -> Self {
        Self {
            id: PolicyId::generate(),
            workspace_id,
            name: name.into(),
            priority: 0,
            enabled: true,
            targets: Vec::new(),
            deny_windows: Vec::new(),
            version_cooldown: None,
            version_selector: None,
            rollout: None,
            approvals: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: PolicyTarget) -> Self {
        self.targets.push(target);
        self
    }
}

/// Scope of a policy; every present selector must match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyTarget {
    pub deployment_selector: Option<Condition>,
    pub environment_selector: Option<Condition>,
    pub resource_selector: Option<Condition>,
}

impl PolicyTarget {
    /// Target matching every release target
    pub fn all() -> Self {
        Self::default()
    }
}

/// Recurrence frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// RRule-style recurrence expressed in local wall-clock time of `timezone`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceSpec {
    pub frequency: Frequency,

    #[serde(default = "default_interval")]
    pub interval: u32,

    #[serde(default)]
    pub by_weekday: Vec<Weekday>,

    /// Months 1-12
    #[serde(default)]
    pub by_month: Vec<u32>,

    /// Days 1-31
    #[serde(default)]
    pub by_month_day: Vec<u32>,

    pub dtstart: NaiveDateTime,

    /// End of the first occurrence; defines the window duration
    pub dtend: Option<NaiveDateTime>,

    /// No occurrence starts after this
    pub until: Option<NaiveDateTime>,

    /// IANA timezone name
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_interval() -> u32 {
    1
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl RecurrenceSpec {
    pub fn new(frequency: Frequency, dtstart: NaiveDateTime) -> Self {
        Self {
            frequency,
            interval: 1,
            by_weekday: Vec::new(),
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            dtstart,
            dtend: None,
            until: None,
            timezone: default_timezone(),
        }
    }

    pub fn with_dtend(mut self, dtend: NaiveDateTime) -> Self {
        self.dtend = Some(dtend);
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }
}

/// Minimum time between successful deployments of a release target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownSpec {
    pub minutes: u32,
}

/// Staggered rollout across the release targets of an environment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RolloutSpec {
    pub kind: RolloutKind,

    /// Minutes
    pub time_scale_interval: f64,

    pub position_growth_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutKind {
    Linear,
    Exponential,
}

/// Approval gate attached to a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalRequirement {
    /// Any users, at least `min_approvals` of them
    Any { min_approvals: u32 },

    /// One specific user
    User { user_id: String },

    /// Users holding `role`, at least `min_approvals` of them
    Role { role: String, min_approvals: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Approved,
    Rejected,
}

/// One user's decision on a (version, environment) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: ApprovalRecordId,
    pub version_id: DeploymentVersionId,
    pub environment_id: EnvironmentId,
    pub user_id: String,

    #[serde(default)]
    pub roles: Vec<String>,

    pub status: ApprovalStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn new(
        version_id: DeploymentVersionId,
        environment_id: EnvironmentId,
        user_id: impl Into<String>,
        status: ApprovalStatus,
    ) -> Self {
        Self {
            id: ApprovalRecordId::generate(),
            version_id,
            environment_id,
            user_id: user_id.into(),
            roles: Vec::new(),
            status,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
