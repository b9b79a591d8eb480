//! Rule engine
//!
//! Rules never mutate candidates. Each returns the narrowed set plus a reason
//! for every candidate it excluded; a candidate's reason is attributed to the
//! first rule that excluded it, and later rules never see it again.

use chrono::{DateTime, Utc};
use rudder_types::{DeploymentVersion, DeploymentVersionId, ReleaseTargetId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use tracing::{debug, trace};

/// Reason used when the chain ends with nothing and no rule gave a reason
pub const NO_CANDIDATES: &str = "No candidates available";

/// Something the engine can choose between
pub trait Candidate: Clone {
    type Id: Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display;

    fn candidate_id(&self) -> Self::Id;

    fn created_at(&self) -> DateTime<Utc>;

    /// Whether upgrades must pass through this candidate
    fn requires_sequential_upgrade(&self) -> bool {
        false
    }
}

impl Candidate for DeploymentVersion {
    type Id = DeploymentVersionId;

    fn candidate_id(&self) -> DeploymentVersionId {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn requires_sequential_upgrade(&self) -> bool {
        DeploymentVersion::requires_sequential_upgrade(self)
    }
}

/// Inputs shared by every rule during one evaluation
#[derive(Debug, Clone)]
pub struct RuleContext<I> {
    pub release_target_id: ReleaseTargetId,

    /// Pinned candidate, if any
    pub desired: Option<I>,

    /// Evaluation instant
    pub now: DateTime<Utc>,
}

impl<I> RuleContext<I> {
    pub fn new(release_target_id: ReleaseTargetId, now: DateTime<Utc>) -> Self {
        Self {
            release_target_id,
            desired: None,
            now,
        }
    }

    pub fn with_desired(mut self, desired: Option<I>) -> Self {
        self.desired = desired;
        self
    }
}

/// Why a candidate was excluded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionReason {
    /// Name of the rejecting rule
    pub rule: String,

    pub message: String,

    /// Earliest instant the rule could pass, when known
    pub retry_at: Option<DateTime<Utc>>,
}

impl RejectionReason {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
            retry_at: None,
        }
    }

    pub fn with_retry_at(mut self, retry_at: DateTime<Utc>) -> Self {
        self.retry_at = Some(retry_at);
        self
    }
}

/// Output of one rule
#[derive(Debug, Clone)]
pub struct RuleResult<C: Candidate> {
    pub allowed: Vec<C>,
    pub rejections: BTreeMap<C::Id, RejectionReason>,
}

impl<C: Candidate> RuleResult<C> {
    /// Let every candidate through
    pub fn pass(candidates: &[C]) -> Self {
        Self {
            allowed: candidates.to_vec(),
            rejections: BTreeMap::new(),
        }
    }

    /// Reject every candidate with the same reason
    pub fn reject_all(candidates: &[C], reason: RejectionReason) -> Self {
        Self {
            allowed: Vec::new(),
            rejections: candidates
                .iter()
                .map(|c| (c.candidate_id(), reason.clone()))
                .collect(),
        }
    }

    /// Split candidates by a per-candidate verdict
    pub fn partition<F>(candidates: &[C], mut verdict: F) -> Self
    where
        F: FnMut(&C) -> Option<RejectionReason>,
    {
        let mut allowed = Vec::with_capacity(candidates.len());
        let mut rejections = BTreeMap::new();
        for candidate in candidates {
            match verdict(candidate) {
                None => allowed.push(candidate.clone()),
                Some(reason) => {
                    rejections.insert(candidate.candidate_id(), reason);
                }
            }
        }
        Self {
            allowed,
            rejections,
        }
    }
}

/// A filter stage of the engine
pub trait FilterRule<C: Candidate> {
    fn name(&self) -> &'static str;

    fn filter(&self, context: &RuleContext<C::Id>, candidates: &[C]) -> RuleResult<C>;
}

/// Outcome of an engine run
#[derive(Debug, Clone)]
pub struct EngineDecision<C: Candidate> {
    pub allowed: bool,
    pub chosen: Option<C>,

    /// Set when nothing was chosen
    pub reason: Option<String>,

    pub rejections: BTreeMap<C::Id, RejectionReason>,
}

/// Ordered chain of filter rules
#[derive(Debug, Clone)]
pub struct RuleEngine<R> {
    rules: Vec<R>,
}

impl<R> Default for RuleEngine<R> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<R> RuleEngine<R> {
    pub fn new(rules: Vec<R>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[R] {
        &self.rules
    }

    /// Run every rule in order and choose at most one candidate
    pub fn evaluate<C>(&self, context: &RuleContext<C::Id>, mut candidates: Vec<C>) -> EngineDecision<C>
    where
        C: Candidate,
        R: FilterRule<C>,
    {
        // Newest first; ids break createdAt ties
        candidates.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.candidate_id().cmp(&a.candidate_id()))
        });

        let mut rejections: BTreeMap<C::Id, RejectionReason> = BTreeMap::new();
        let mut last_reason: Option<String> = None;

        for rule in &self.rules {
            let result = rule.filter(context, &candidates);
            trace!(
                rule = rule.name(),
                allowed = result.allowed.len(),
                rejected = result.rejections.len(),
                "Rule applied"
            );
            for (id, reason) in result.rejections {
                last_reason = Some(reason.message.clone());
                rejections.entry(id).or_insert(reason);
            }
            candidates = result.allowed;
        }

        if candidates.is_empty() {
            let reason = last_reason.unwrap_or_else(|| NO_CANDIDATES.to_string());
            debug!(
                release_target_id = %context.release_target_id,
                reason = %reason,
                "No candidate passed the rule chain"
            );
            return EngineDecision {
                allowed: false,
                chosen: None,
                reason: Some(reason),
                rejections,
            };
        }

        let chosen = select(context, candidates);
        EngineDecision {
            allowed: true,
            chosen: Some(chosen),
            reason: None,
            rejections,
        }
    }
}

/// Sequential-upgrade candidates first (oldest wins), then the pinned
/// candidate, then the newest. `candidates` is sorted newest first.
fn select<C: Candidate>(context: &RuleContext<C::Id>, candidates: Vec<C>) -> C {
    let mut candidates = candidates;

    let oldest_sequential = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.requires_sequential_upgrade())
        .min_by(|(_, a), (_, b)| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.candidate_id().cmp(&b.candidate_id()))
        })
        .map(|(i, _)| i);
    if let Some(index) = oldest_sequential {
        return candidates.swap_remove(index);
    }

    if let Some(desired) = &context.desired {
        if let Some(index) = candidates.iter().position(|c| &c.candidate_id() == desired) {
            return candidates.swap_remove(index);
        }
    }

    candidates.swap_remove(0)
}
