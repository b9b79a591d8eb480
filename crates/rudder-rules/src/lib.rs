//! Rudder Rules - Deterministic version selection for release targets
//!
//! The [`RuleEngine`] threads a candidate set through an ordered chain of
//! filter rules and picks at most one survivor. Concrete rules derived from
//! policies form the closed [`PolicyRule`] set; approvals are a separate
//! gate evaluated next to the engine, not one of its stages.
//!
//! ## Selection
//!
//! Among surviving candidates: the oldest one requiring a sequential upgrade,
//! else the pinned candidate if still present, else the newest.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod approval;
pub mod cooldown;
pub mod deny_window;
pub mod engine;
pub mod error;
pub mod policy;
pub mod recurrence;
pub mod rollout;
pub mod version_selector;

pub use approval::{evaluate_approvals, ApprovalOutcome};
pub use cooldown::CooldownRule;
pub use deny_window::DenyWindowRule;
pub use engine::{
    Candidate, EngineDecision, FilterRule, RejectionReason, RuleContext, RuleEngine, RuleResult,
};
pub use error::{Result, RuleError};
pub use policy::{
    applicable_policies, build_rule_chain, policy_applies, validate_policy, PolicyInputs,
    PolicyRule,
};
pub use recurrence::Recurrence;
pub use rollout::{
    rollout_offset_minutes, rollout_position, validate_rollout, RolloutInfo, RolloutRule,
};
pub use version_selector::VersionSelectorRule;
