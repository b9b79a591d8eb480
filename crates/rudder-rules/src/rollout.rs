//! Staggered environment rollout
//!
//! Every release target of an environment × deployment gets a deterministic
//! position per version. A candidate becomes deployable at
//! `startOfMinute(start) + offset(position)`.

use crate::approval::evaluate_approvals;
use crate::engine::{FilterRule, RejectionReason, RuleContext, RuleResult};
use crate::error::{Result, RuleError};
use chrono::{DateTime, Duration, Utc};
use rudder_types::{
    ApprovalRecord, ApprovalRequirement, DeploymentVersion, DeploymentVersionId, EnvironmentId,
    ReleaseTargetId, RolloutKind, RolloutSpec,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Offsets are capped at 100 years
const MAX_OFFSET_MINUTES: f64 = 100.0 * 365.0 * 24.0 * 60.0;

/// Rollout state of one release target for one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutInfo {
    pub allowed: bool,
    pub rollout_position: usize,

    /// `None` while the rollout has not started (approvals pending)
    pub rollout_time: Option<DateTime<Utc>>,
}

/// Rank of `target` among `peers` for `version`
///
/// Targets are ordered by `sha256(target_id ‖ version_id)`, so every version
/// shuffles the order while staying reproducible.
pub fn rollout_position(
    target: ReleaseTargetId,
    version: DeploymentVersionId,
    peers: &[ReleaseTargetId],
) -> usize {
    let key = |id: ReleaseTargetId| {
        let mut hasher = Sha256::new();
        hasher.update(id.as_uuid().as_bytes());
        hasher.update(version.as_uuid().as_bytes());
        (hasher.finalize().to_vec(), id)
    };

    let own = key(target);
    peers
        .iter()
        .filter(|peer| **peer != target)
        .filter(|peer| key(**peer) < own)
        .count()
}

/// Minutes after rollout start at which `position` may deploy
pub fn rollout_offset_minutes(spec: &RolloutSpec, position: usize) -> f64 {
    let position = position as f64;
    let offset = match spec.kind {
        RolloutKind::Linear => position * (spec.time_scale_interval / spec.position_growth_factor),
        RolloutKind::Exponential => {
            spec.time_scale_interval * ((position / spec.position_growth_factor).exp() - 1.0)
        }
    };
    offset.clamp(0.0, MAX_OFFSET_MINUTES)
}

fn start_of_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = at.timestamp();
    DateTime::from_timestamp(seconds - seconds.rem_euclid(60), 0).unwrap_or(at)
}

/// Reject rollout specs whose offsets cannot be computed
pub fn validate_rollout(spec: &RolloutSpec) -> Result<()> {
    if !spec.time_scale_interval.is_finite() || spec.time_scale_interval < 0.0 {
        return Err(RuleError::InvalidRollout(
            "time_scale_interval must be a non-negative number of minutes".into(),
        ));
    }
    if !spec.position_growth_factor.is_finite() || spec.position_growth_factor <= 0.0 {
        return Err(RuleError::InvalidRollout(
            "position_growth_factor must be positive".into(),
        ));
    }
    Ok(())
}

/// Holds back candidates until this target's slot in the rollout
#[derive(Debug, Clone)]
pub struct RolloutRule {
    spec: RolloutSpec,
    release_target_id: ReleaseTargetId,
    environment_id: EnvironmentId,
    peers: Vec<ReleaseTargetId>,
    approvals: Vec<ApprovalRequirement>,
    approval_records: Vec<ApprovalRecord>,
}

impl RolloutRule {
    pub const NAME: &'static str = "environment-rollout";

    pub fn new(
        spec: RolloutSpec,
        release_target_id: ReleaseTargetId,
        environment_id: EnvironmentId,
        peers: Vec<ReleaseTargetId>,
    ) -> Result<Self> {
        validate_rollout(&spec)?;
        Ok(Self {
            spec,
            release_target_id,
            environment_id,
            peers,
            approvals: Vec::new(),
            approval_records: Vec::new(),
        })
    }

    /// Start the rollout when the approvals are satisfied instead of at
    /// version creation
    pub fn with_approvals(
        mut self,
        requirements: Vec<ApprovalRequirement>,
        records: Vec<ApprovalRecord>,
    ) -> Self {
        self.approvals = requirements;
        self.approval_records = records;
        self
    }

    fn start_time(&self, version: &DeploymentVersion) -> Option<DateTime<Utc>> {
        if self.approvals.is_empty() {
            return Some(version.created_at);
        }
        let outcome = evaluate_approvals(
            &self.approvals,
            &self.approval_records,
            version.id,
            self.environment_id,
        );
        if !outcome.passing {
            return None;
        }
        Some(outcome.satisfied_at.unwrap_or(version.created_at))
    }

    pub fn info(&self, version: &DeploymentVersion, now: DateTime<Utc>) -> RolloutInfo {
        let rollout_position = rollout_position(self.release_target_id, version.id, &self.peers);
        let offset = rollout_offset_minutes(&self.spec, rollout_position);

        let rollout_time = self.start_time(version).and_then(|start| {
            let offset = Duration::milliseconds((offset * 60_000.0).round() as i64);
            start_of_minute(start).checked_add_signed(offset)
        });

        RolloutInfo {
            allowed: rollout_time.is_some_and(|at| now >= at),
            rollout_position,
            rollout_time,
        }
    }
}

impl FilterRule<DeploymentVersion> for RolloutRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn filter(
        &self,
        context: &RuleContext<DeploymentVersionId>,
        candidates: &[DeploymentVersion],
    ) -> RuleResult<DeploymentVersion> {
        RuleResult::partition(candidates, |version| {
            let info = self.info(version, context.now);
            if info.allowed {
                return None;
            }
            Some(match info.rollout_time {
                Some(at) => RejectionReason::new(
                    Self::NAME,
                    format!(
                        "Rollout position {} deploys at {}",
                        info.rollout_position,
                        at.to_rfc3339()
                    ),
                )
                .with_retry_at(at),
                None => RejectionReason::new(
                    Self::NAME,
                    "Rollout has not started, approvals pending",
                ),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rudder_types::{ApprovalStatus, DeploymentId};

    fn spec(kind: RolloutKind, time_scale_interval: f64, growth: f64) -> RolloutSpec {
        RolloutSpec {
            kind,
            time_scale_interval,
            position_growth_factor: growth,
        }
    }

    #[test]
    fn test_position_is_a_permutation() {
        let version = DeploymentVersionId::generate();
        let peers: Vec<ReleaseTargetId> = (0..20).map(|_| ReleaseTargetId::generate()).collect();

        let mut positions: Vec<usize> = peers
            .iter()
            .map(|t| rollout_position(*t, version, &peers))
            .collect();
        positions.sort_unstable();
        assert_eq!(positions, (0..20).collect::<Vec<_>>());

        // Stable across calls
        assert_eq!(
            rollout_position(peers[3], version, &peers),
            rollout_position(peers[3], version, &peers)
        );
    }

    #[test]
    fn test_linear_offset() {
        let s = spec(RolloutKind::Linear, 60.0, 2.0);
        assert_eq!(rollout_offset_minutes(&s, 0), 0.0);
        assert_eq!(rollout_offset_minutes(&s, 1), 30.0);
        assert_eq!(rollout_offset_minutes(&s, 4), 120.0);
    }

    #[test]
    fn test_exponential_zero_at_origin() {
        let s = spec(RolloutKind::Exponential, 60.0, 2.0);
        assert_eq!(rollout_offset_minutes(&s, 0), 0.0);
    }

    #[test]
    fn test_invalid_specs() {
        let target = ReleaseTargetId::generate();
        let env = EnvironmentId::generate();
        assert!(RolloutRule::new(spec(RolloutKind::Linear, 10.0, 0.0), target, env, vec![]).is_err());
        assert!(RolloutRule::new(spec(RolloutKind::Linear, -1.0, 1.0), target, env, vec![]).is_err());
    }

    #[test]
    fn test_deployment_time_starts_at_minute() {
        let target = ReleaseTargetId::generate();
        let env = EnvironmentId::generate();
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 42).unwrap();
        let version =
            DeploymentVersion::new(DeploymentId::generate(), "v1").with_created_at(created);

        // Single target: position 0, offset 0
        let rule = RolloutRule::new(
            spec(RolloutKind::Linear, 60.0, 1.0),
            target,
            env,
            vec![target],
        )
        .unwrap();
        let info = rule.info(&version, created);
        assert_eq!(info.rollout_position, 0);
        assert_eq!(
            info.rollout_time,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        assert!(info.allowed);
    }

    #[test]
    fn test_filter_holds_back_late_positions() {
        let env = EnvironmentId::generate();
        let peers: Vec<ReleaseTargetId> = (0..10).map(|_| ReleaseTargetId::generate()).collect();
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let version =
            DeploymentVersion::new(DeploymentId::generate(), "v1").with_created_at(created);

        let last = peers
            .iter()
            .copied()
            .find(|t| rollout_position(*t, version.id, &peers) == 9)
            .unwrap();
        let rule = RolloutRule::new(spec(RolloutKind::Linear, 10.0, 1.0), last, env, peers).unwrap();

        let ctx = RuleContext::new(last, created + Duration::minutes(89));
        let result = rule.filter(&ctx, &[version.clone()]);
        let reason = &result.rejections[&version.id];
        assert_eq!(reason.retry_at, Some(created + Duration::minutes(90)));

        let ctx = RuleContext::new(last, created + Duration::minutes(90));
        assert_eq!(rule.filter(&ctx, &[version]).allowed.len(), 1);
    }

    #[test]
    fn test_rollout_waits_for_approvals() {
        let target = ReleaseTargetId::generate();
        let env = EnvironmentId::generate();
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let version =
            DeploymentVersion::new(DeploymentId::generate(), "v1").with_created_at(created);
        let requirement = vec![ApprovalRequirement::Any { min_approvals: 1 }];

        let pending = RolloutRule::new(spec(RolloutKind::Linear, 10.0, 1.0), target, env, vec![target])
            .unwrap()
            .with_approvals(requirement.clone(), vec![]);
        assert_eq!(pending.info(&version, created).rollout_time, None);

        let approved_at = created + Duration::hours(3);
        let approved = pending.clone().with_approvals(
            requirement,
            vec![ApprovalRecord::new(version.id, env, "alice", ApprovalStatus::Approved)
                .with_created_at(approved_at)],
        );
        assert_eq!(approved.info(&version, created).rollout_time, Some(approved_at));
    }

    proptest! {
        #[test]
        fn prop_linear_offset_non_decreasing(
            scale in 0.0f64..1_000.0,
            growth in 0.1f64..100.0,
            position in 0usize..10_000,
        ) {
            let s = spec(RolloutKind::Linear, scale, growth);
            prop_assert!(rollout_offset_minutes(&s, position) <= rollout_offset_minutes(&s, position + 1));
        }

        #[test]
        fn prop_exponential_outgrows_linear(
            scale in 1.0f64..1_000.0,
            growth in 1.0f64..50.0,
            position in 1usize..200,
        ) {
            let linear = rollout_offset_minutes(&spec(RolloutKind::Linear, scale, growth), position);
            let exponential = rollout_offset_minutes(&spec(RolloutKind::Exponential, scale, growth), position);
            prop_assert!(exponential > linear);
        }
    }
}
