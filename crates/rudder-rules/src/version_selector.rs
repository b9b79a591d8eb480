//! Restricts candidates to versions matching a selector

use crate::engine::{FilterRule, RejectionReason, RuleContext, RuleResult};
use crate::error::Result;
use rudder_types::{Condition, DeploymentVersion, DeploymentVersionId};

/// Rejects versions outside the selector; a missing selector allows all
#[derive(Debug, Clone, PartialEq)]
pub struct VersionSelectorRule {
    selector: Option<Condition>,
}

impl VersionSelectorRule {
    pub const NAME: &'static str = "version-selector";
    pub const REJECTION: &'static str = "Version not in version selector.";

    pub fn new(selector: Option<Condition>) -> Result<Self> {
        if let Some(selector) = &selector {
            rudder_selector::validate(selector)?;
        }
        Ok(Self { selector })
    }
}

impl FilterRule<DeploymentVersion> for VersionSelectorRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn filter(
        &self,
        _context: &RuleContext<DeploymentVersionId>,
        candidates: &[DeploymentVersion],
    ) -> RuleResult<DeploymentVersion> {
        let Some(selector) = &self.selector else {
            return RuleResult::pass(candidates);
        };
        RuleResult::partition(candidates, |version| {
            (!rudder_selector::matches(version, selector))
                .then(|| RejectionReason::new(Self::NAME, Self::REJECTION))
        })
    }
}
