//! Approval gate
//!
//! Approvals are recorded per (version, environment). Each user's most recent
//! record is their standing decision; any standing rejection blocks.

use chrono::{DateTime, Utc};
use rudder_types::{
    ApprovalRecord, ApprovalRequirement, ApprovalStatus, DeploymentVersionId, EnvironmentId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of evaluating approval requirements for one version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub passing: bool,

    /// When the last requirement became satisfied
    pub satisfied_at: Option<DateTime<Utc>>,

    /// Standing rejections
    pub rejections: Vec<String>,

    /// Requirements not yet met
    pub outstanding: Vec<String>,
}

/// Evaluate `requirements` against the records for a version in an environment
pub fn evaluate_approvals(
    requirements: &[ApprovalRequirement],
    records: &[ApprovalRecord],
    version_id: DeploymentVersionId,
    environment_id: EnvironmentId,
) -> ApprovalOutcome {
    if requirements.is_empty() {
        return ApprovalOutcome {
            passing: true,
            ..Default::default()
        };
    }

    let mut standing: BTreeMap<&str, &ApprovalRecord> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.version_id == version_id && r.environment_id == environment_id)
    {
        let newer = standing
            .get(record.user_id.as_str())
            .map_or(true, |current| {
                (record.created_at, record.id) > (current.created_at, current.id)
            });
        if newer {
            standing.insert(record.user_id.as_str(), record);
        }
    }

    let rejections: Vec<String> = standing
        .values()
        .filter(|r| r.status == ApprovalStatus::Rejected)
        .map(|r| match &r.reason {
            Some(reason) => format!("Rejected by {}: {}", r.user_id, reason),
            None => format!("Rejected by {}", r.user_id),
        })
        .collect();

    let mut approvals: Vec<&ApprovalRecord> = standing
        .values()
        .copied()
        .filter(|r| r.status == ApprovalStatus::Approved)
        .collect();
    approvals.sort_by_key(|r| (r.created_at, r.id));

    let mut outstanding = Vec::new();
    let mut satisfied_at: Option<DateTime<Utc>> = None;
    for requirement in requirements {
        match satisfied_time(requirement, &approvals) {
            Some(at) => satisfied_at = satisfied_at.max(at),
            None => outstanding.push(describe(requirement)),
        }
    }

    let passing = rejections.is_empty() && outstanding.is_empty();
    ApprovalOutcome {
        passing,
        satisfied_at: if passing { satisfied_at } else { None },
        rejections,
        outstanding,
    }
}

/// `Some(None)` means satisfied without any approval being needed
fn satisfied_time(
    requirement: &ApprovalRequirement,
    approvals: &[&ApprovalRecord],
) -> Option<Option<DateTime<Utc>>> {
    let nth = |matching: Vec<&&ApprovalRecord>, n: u32| -> Option<Option<DateTime<Utc>>> {
        if n == 0 {
            return Some(None);
        }
        matching.get(n as usize - 1).map(|r| Some(r.created_at))
    };

    match requirement {
        ApprovalRequirement::Any { min_approvals } => {
            nth(approvals.iter().collect(), *min_approvals)
        }
        ApprovalRequirement::User { user_id } => approvals
            .iter()
            .find(|r| &r.user_id == user_id)
            .map(|r| Some(r.created_at)),
        ApprovalRequirement::Role {
            role,
            min_approvals,
        } => nth(
            approvals.iter().filter(|r| r.roles.contains(role)).collect(),
            *min_approvals,
        ),
    }
}

fn describe(requirement: &ApprovalRequirement) -> String {
    match requirement {
        ApprovalRequirement::Any { min_approvals } => {
            format!("Waiting for {} approval(s)", min_approvals)
        }
        ApprovalRequirement::User { user_id } => format!("Waiting for approval from {}", user_id),
        ApprovalRequirement::Role {
            role,
            min_approvals,
        } => format!("Waiting for {} approval(s) from role {}", min_approvals, role),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ids() -> (DeploymentVersionId, EnvironmentId) {
        (DeploymentVersionId::generate(), EnvironmentId::generate())
    }

    #[test]
    fn test_no_requirements_passes() {
        let (v, e) = ids();
        assert!(evaluate_approvals(&[], &[], v, e).passing);
    }

    #[test]
    fn test_any_counts_distinct_users() {
        let (v, e) = ids();
        let t = Utc::now();
        let records = vec![
            ApprovalRecord::new(v, e, "alice", ApprovalStatus::Approved).with_created_at(t),
            ApprovalRecord::new(v, e, "alice", ApprovalStatus::Approved)
                .with_created_at(t + Duration::minutes(1)),
            ApprovalRecord::new(v, e, "bob", ApprovalStatus::Approved)
                .with_created_at(t + Duration::minutes(5)),
        ];
        let req = [ApprovalRequirement::Any { min_approvals: 2 }];

        let outcome = evaluate_approvals(&req, &records[..2], v, e);
        assert!(!outcome.passing);
        assert_eq!(outcome.outstanding.len(), 1);

        let outcome = evaluate_approvals(&req, &records, v, e);
        assert!(outcome.passing);
        assert_eq!(outcome.satisfied_at, Some(t + Duration::minutes(5)));
    }

    #[test]
    fn test_standing_rejection_blocks() {
        let (v, e) = ids();
        let t = Utc::now();
        let req = [ApprovalRequirement::Any { min_approvals: 1 }];
        let mut records = vec![
            ApprovalRecord::new(v, e, "alice", ApprovalStatus::Approved).with_created_at(t),
            ApprovalRecord::new(v, e, "bob", ApprovalStatus::Rejected)
                .with_reason("breaks login")
                .with_created_at(t),
        ];

        let outcome = evaluate_approvals(&req, &records, v, e);
        assert!(!outcome.passing);
        assert_eq!(outcome.rejections, vec!["Rejected by bob: breaks login".to_string()]);

        // A later approval replaces the rejection
        records.push(
            ApprovalRecord::new(v, e, "bob", ApprovalStatus::Approved)
                .with_created_at(t + Duration::minutes(2)),
        );
        assert!(evaluate_approvals(&req, &records, v, e).passing);
    }

    #[test]
    fn test_user_and_role_requirements() {
        let (v, e) = ids();
        let other_env = EnvironmentId::generate();
        let records = vec![
            ApprovalRecord::new(v, e, "carol", ApprovalStatus::Approved).with_roles(&["sre"]),
            ApprovalRecord::new(v, other_env, "dave", ApprovalStatus::Approved)
                .with_roles(&["sre"]),
        ];

        let user = [ApprovalRequirement::User {
            user_id: "carol".into(),
        }];
        assert!(evaluate_approvals(&user, &records, v, e).passing);

        let role = [ApprovalRequirement::Role {
            role: "sre".into(),
            min_approvals: 2,
        }];
        let outcome = evaluate_approvals(&role, &records, v, e);
        assert!(!outcome.passing);
        assert_eq!(outcome.outstanding, vec!["Waiting for 2 approval(s) from role sre"]);
    }
}
