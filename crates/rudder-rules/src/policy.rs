//! Policies compiled into rule chains
//!
//! A policy applies to a release target when any of its targets matches.
//! Applicable policies contribute rules by priority (highest first), and each
//! policy in the fixed order deny-window, cooldown, version-selector, rollout.

use crate::cooldown::CooldownRule;
use crate::deny_window::DenyWindowRule;
use crate::engine::{FilterRule, RuleContext, RuleResult};
use crate::error::Result;
use crate::recurrence::Recurrence;
use crate::rollout::{validate_rollout, RolloutRule};
use crate::version_selector::VersionSelectorRule;
use chrono::{DateTime, Utc};
use rudder_selector::{matches, validate};
use rudder_types::{
    ApprovalRecord, Deployment, DeploymentVersion, DeploymentVersionId, Environment,
    EnvironmentId, Policy, PolicyTarget, ReleaseTargetId, Resource,
};
use tracing::debug;

/// The closed set of filter rules derived from policies
#[derive(Debug, Clone)]
pub enum PolicyRule {
    DenyWindow(DenyWindowRule),
    Cooldown(CooldownRule),
    VersionSelector(VersionSelectorRule),
    Rollout(RolloutRule),
}

impl FilterRule<DeploymentVersion> for PolicyRule {
    fn name(&self) -> &'static str {
        match self {
            Self::DenyWindow(rule) => FilterRule::<DeploymentVersion>::name(rule),
            Self::Cooldown(rule) => FilterRule::<DeploymentVersion>::name(rule),
            Self::VersionSelector(rule) => rule.name(),
            Self::Rollout(rule) => rule.name(),
        }
    }

    fn filter(
        &self,
        context: &RuleContext<DeploymentVersionId>,
        candidates: &[DeploymentVersion],
    ) -> RuleResult<DeploymentVersion> {
        match self {
            Self::DenyWindow(rule) => rule.filter(context, candidates),
            Self::Cooldown(rule) => rule.filter(context, candidates),
            Self::VersionSelector(rule) => rule.filter(context, candidates),
            Self::Rollout(rule) => rule.filter(context, candidates),
        }
    }
}

fn target_matches(
    target: &PolicyTarget,
    deployment: &Deployment,
    environment: &Environment,
    resource: &Resource,
) -> bool {
    target
        .deployment_selector
        .as_ref()
        .map_or(true, |s| matches(deployment, s))
        && target
            .environment_selector
            .as_ref()
            .map_or(true, |s| matches(environment, s))
        && target
            .resource_selector
            .as_ref()
            .map_or(true, |s| matches(resource, s))
}

/// Whether an enabled policy targets this (deployment, environment, resource)
pub fn policy_applies(
    policy: &Policy,
    deployment: &Deployment,
    environment: &Environment,
    resource: &Resource,
) -> bool {
    policy.enabled
        && policy
            .targets
            .iter()
            .any(|t| target_matches(t, deployment, environment, resource))
}

/// Policies applying to a release target, highest priority first
pub fn applicable_policies<'p>(
    policies: &'p [Policy],
    deployment: &Deployment,
    environment: &Environment,
    resource: &Resource,
) -> Vec<&'p Policy> {
    let mut applicable: Vec<&Policy> = policies
        .iter()
        .filter(|p| policy_applies(p, deployment, environment, resource))
        .collect();
    applicable.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    applicable
}

/// Check that every selector and rule spec of a policy compiles
///
/// A policy passing this check never fails [`build_rule_chain`].
pub fn validate_policy(policy: &Policy) -> Result<()> {
    for target in &policy.targets {
        [
            &target.deployment_selector,
            &target.environment_selector,
            &target.resource_selector,
        ]
        .into_iter()
        .flatten()
        .try_for_each(validate)?;
    }
    for window in &policy.deny_windows {
        Recurrence::new(window.clone())?;
    }
    if let Some(selector) = &policy.version_selector {
        validate(selector)?;
    }
    if let Some(rollout) = &policy.rollout {
        validate_rollout(rollout)?;
    }
    Ok(())
}

/// Runtime facts rules need beyond the policy itself
#[derive(Debug, Clone)]
pub struct PolicyInputs<'a> {
    pub release_target_id: ReleaseTargetId,
    pub environment_id: EnvironmentId,

    /// Completion time of the target's most recent successful job
    pub last_successful_deploy: Option<DateTime<Utc>>,

    /// All release targets of the same environment × deployment
    pub rollout_peers: &'a [ReleaseTargetId],

    /// Approval records for the environment
    pub approval_records: &'a [ApprovalRecord],
}

/// Compile applicable policies into an ordered rule chain
pub fn build_rule_chain(policies: &[&Policy], inputs: &PolicyInputs<'_>) -> Result<Vec<PolicyRule>> {
    let mut rules = Vec::new();

    for policy in policies {
        for window in &policy.deny_windows {
            rules.push(PolicyRule::DenyWindow(DenyWindowRule::new(window.clone())?));
        }
        if let Some(cooldown) = policy.version_cooldown {
            rules.push(PolicyRule::Cooldown(CooldownRule::new(
                cooldown.minutes,
                inputs.last_successful_deploy,
            )));
        }
        if policy.version_selector.is_some() {
            rules.push(PolicyRule::VersionSelector(VersionSelectorRule::new(
                policy.version_selector.clone(),
            )?));
        }
        if let Some(rollout) = policy.rollout {
            let rule = RolloutRule::new(
                rollout,
                inputs.release_target_id,
                inputs.environment_id,
                inputs.rollout_peers.to_vec(),
            )?
            .with_approvals(policy.approvals.clone(), inputs.approval_records.to_vec());
            rules.push(PolicyRule::Rollout(rule));
        }
        debug!(policy_id = %policy.id, policy = %policy.name, "Policy compiled");
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RuleEngine;
    use crate::error::RuleError;
    use chrono::Duration;
    use rudder_selector::{SelectorError, MAX_DEPTH};
    use rudder_types::{
        Condition, CooldownSpec, DeploymentId, Frequency, RecurrenceSpec, RolloutKind,
        RolloutSpec, StringOperator, SystemId, WorkspaceId,
    };

    struct Graph {
        deployment: Deployment,
        environment: Environment,
        resource: Resource,
    }

    fn graph() -> Graph {
        let ws = WorkspaceId::generate();
        let system = SystemId::generate();
        Graph {
            deployment: Deployment::new(system, "api"),
            environment: Environment::new(system, "production")
                .with_selector(Condition::kind("web")),
            resource: Resource::new(ws, "web", "web-1", "web/1").with_metadata("region", "eu"),
        }
    }

    fn targeted(ws: WorkspaceId, name: &str, target: PolicyTarget) -> Policy {
        Policy::new(ws, name).with_target(target)
    }

    #[test]
    fn test_policy_targeting() {
        let g = graph();
        let ws = g.resource.workspace_id;

        let prod_only = targeted(
            ws,
            "prod",
            PolicyTarget {
                environment_selector: Some(Condition::name(StringOperator::Equals, "production")),
                ..Default::default()
            },
        );
        let us_only = targeted(
            ws,
            "us",
            PolicyTarget {
                resource_selector: Some(Condition::metadata_equals("region", "us")),
                ..Default::default()
            },
        );
        let untargeted = Policy::new(ws, "nothing");
        let mut disabled = targeted(ws, "off", PolicyTarget::all());
        disabled.enabled = false;

        assert!(policy_applies(&prod_only, &g.deployment, &g.environment, &g.resource));
        assert!(!policy_applies(&us_only, &g.deployment, &g.environment, &g.resource));
        assert!(!policy_applies(&untargeted, &g.deployment, &g.environment, &g.resource));
        assert!(!policy_applies(&disabled, &g.deployment, &g.environment, &g.resource));
    }

    #[test]
    fn test_validate_policy_rejects_uncompilable_specs() {
        let ws = WorkspaceId::generate();
        let valid = targeted(ws, "ok", PolicyTarget::all());
        assert!(validate_policy(&valid).is_ok());

        let mut bad_tz = valid.clone();
        bad_tz.deny_windows.push(
            RecurrenceSpec::new(Frequency::Daily, Utc::now().naive_utc())
                .with_timezone("Nowhere/Atlantis"),
        );
        assert!(matches!(
            validate_policy(&bad_tz),
            Err(RuleError::InvalidTimezone(_))
        ));

        let mut bad_selector = valid.clone();
        bad_selector.version_selector = Some(Condition::tag(StringOperator::Regex, "(v2"));
        assert!(matches!(
            validate_policy(&bad_selector),
            Err(RuleError::Selector(SelectorError::InvalidRegex { .. }))
        ));

        let nested = (0..=MAX_DEPTH).fold(Condition::kind("web"), |inner, _| {
            Condition::and(vec![inner])
        });
        let deep_target = targeted(
            ws,
            "deep",
            PolicyTarget {
                resource_selector: Some(nested),
                ..Default::default()
            },
        );
        assert!(matches!(
            validate_policy(&deep_target),
            Err(RuleError::Selector(SelectorError::TooDeep { .. }))
        ));

        let mut bad_rollout = valid;
        bad_rollout.rollout = Some(RolloutSpec {
            kind: RolloutKind::Linear,
            time_scale_interval: 10.0,
            position_growth_factor: 0.0,
        });
        assert!(matches!(
            validate_policy(&bad_rollout),
            Err(RuleError::InvalidRollout(_))
        ));
    }

    #[test]
    fn test_priority_order() {
        let g = graph();
        let ws = g.resource.workspace_id;
        let mut low = targeted(ws, "low", PolicyTarget::all());
        low.priority = 1;
        let mut high = targeted(ws, "high", PolicyTarget::all());
        high.priority = 10;

        let policies = vec![low, high];
        let ordered = applicable_policies(&policies, &g.deployment, &g.environment, &g.resource);
        let names: Vec<&str> = ordered.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low"]);
    }

    #[test]
    fn test_chain_applies_cooldown_then_selector() {
        let g = graph();
        let ws = g.resource.workspace_id;
        let now = Utc::now();

        let mut policy = targeted(ws, "gate", PolicyTarget::all());
        policy.version_cooldown = Some(CooldownSpec { minutes: 30 });
        policy.version_selector = Some(Condition::tag(StringOperator::StartsWith, "v2"));

        let target = ReleaseTargetId::generate();
        let peers = [target];
        let inputs = PolicyInputs {
            release_target_id: target,
            environment_id: g.environment.id,
            last_successful_deploy: Some(now - Duration::minutes(10)),
            rollout_peers: &peers,
            approval_records: &[],
        };
        let rules = build_rule_chain(&[&policy], &inputs).unwrap();
        let names: Vec<&str> = rules
            .iter()
            .map(|r| FilterRule::<DeploymentVersion>::name(r))
            .collect();
        assert_eq!(names, vec!["version-cooldown", "version-selector"]);

        let deployment = DeploymentId::generate();
        let v1 = DeploymentVersion::new(deployment, "v1.0").with_created_at(now - Duration::hours(2));
        let v2 = DeploymentVersion::new(deployment, "v2.0").with_created_at(now - Duration::hours(1));

        let engine = RuleEngine::new(rules);
        let ctx = RuleContext::new(target, now);
        let decision = engine.evaluate(&ctx, vec![v1.clone(), v2.clone()]);

        // Cooldown rejects everything first; the selector never sees v1
        assert!(!decision.allowed);
        assert_eq!(decision.rejections[&v1.id].rule, "version-cooldown");
        assert_eq!(decision.rejections[&v2.id].rule, "version-cooldown");

        let inputs = PolicyInputs {
            last_successful_deploy: Some(now - Duration::minutes(45)),
            ..inputs
        };
        let engine = RuleEngine::new(build_rule_chain(&[&policy], &inputs).unwrap());
        let decision = engine.evaluate(&ctx, vec![v1.clone(), v2.clone()]);
        assert_eq!(decision.chosen.map(|v| v.id), Some(v2.id));
        assert_eq!(decision.rejections[&v1.id].message, "Version not in version selector.");
    }
}
