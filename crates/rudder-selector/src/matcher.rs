//! Selector evaluation
//!
//! AND/OR short-circuit left to right. An empty AND matches, an empty OR
//! does not.

use crate::subject::Selectable;
use dashmap::DashMap;
use regex::Regex;
use rudder_types::{
    ComparisonOperator, Condition, DateCondition, DateOperator, Deployment, Environment,
    MetadataCondition, MetadataOperator, Resource, StringCondition, StringOperator,
};
use std::sync::OnceLock;
use tracing::debug;

/// Compiled patterns kept before the cache is reset
const MAX_CACHED_PATTERNS: usize = 1024;

fn compiled_patterns() -> &'static DashMap<String, Regex> {
    static PATTERNS: OnceLock<DashMap<String, Regex>> = OnceLock::new();
    PATTERNS.get_or_init(DashMap::new)
}

/// Evaluate `selector` against `subject`
pub fn matches<S: Selectable + ?Sized>(subject: &S, selector: &Condition) -> bool {
    if subject.is_soft_deleted() {
        return false;
    }
    eval(subject, selector)
}

/// Environment membership; an environment without a selector matches nothing
pub fn environment_matches(environment: &Environment, resource: &Resource) -> bool {
    match &environment.resource_selector {
        Some(selector) => matches(resource, selector),
        None => false,
    }
}

/// Deployment narrowing; a deployment without a selector accepts every resource
pub fn deployment_matches(deployment: &Deployment, resource: &Resource) -> bool {
    match &deployment.resource_selector {
        Some(selector) => matches(resource, selector),
        None => !resource.is_deleted(),
    }
}

fn eval<S: Selectable + ?Sized>(subject: &S, condition: &Condition) -> bool {
    match condition {
        Condition::Comparison {
            operator,
            conditions,
        } => match operator {
            ComparisonOperator::And => conditions.iter().all(|c| eval(subject, c)),
            ComparisonOperator::Or => conditions.iter().any(|c| eval(subject, c)),
        },
        Condition::Not { condition } => !eval(subject, condition),
        Condition::Metadata(meta) => eval_metadata(subject, meta),
        Condition::Name(cond) => eval_string(subject.selector_name(), cond),
        Condition::Identifier(cond) => eval_string(subject.selector_identifier(), cond),
        Condition::Version(cond) => eval_string(subject.selector_version(), cond),
        Condition::Tag(cond) => eval_string(subject.selector_tag(), cond),
        Condition::Kind { value } => subject.selector_kind() == Some(value.as_str()),
        Condition::Id { value } => subject.selector_id() == *value,
        Condition::CreatedAt(cond) => eval_date(subject, cond),
    }
}

fn eval_metadata<S: Selectable + ?Sized>(subject: &S, cond: &MetadataCondition) -> bool {
    let Some(metadata) = subject.selector_metadata() else {
        return false;
    };
    let actual = metadata.get(&cond.key).map(String::as_str);

    let operator = match cond.operator {
        MetadataOperator::Null => return actual.is_none(),
        MetadataOperator::Equals => StringOperator::Equals,
        MetadataOperator::Contains => StringOperator::Contains,
        MetadataOperator::StartsWith => StringOperator::StartsWith,
        MetadataOperator::EndsWith => StringOperator::EndsWith,
        MetadataOperator::Regex => StringOperator::Regex,
    };
    match cond.value.as_deref() {
        Some(expected) => compare(operator, actual, expected),
        None => false,
    }
}

fn eval_string(actual: Option<&str>, cond: &StringCondition) -> bool {
    compare(cond.operator, actual, &cond.value)
}

fn compare(operator: StringOperator, actual: Option<&str>, expected: &str) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match operator {
        StringOperator::Equals => actual == expected,
        StringOperator::Contains => actual.contains(expected),
        StringOperator::StartsWith => actual.starts_with(expected),
        StringOperator::EndsWith => actual.ends_with(expected),
        StringOperator::Regex => regex_matches(expected, actual),
    }
}

fn eval_date<S: Selectable + ?Sized>(subject: &S, cond: &DateCondition) -> bool {
    let created_at = subject.selector_created_at();
    match cond.operator {
        DateOperator::Before => created_at < cond.value,
        DateOperator::After => created_at > cond.value,
        DateOperator::BeforeOrOn => created_at <= cond.value,
        DateOperator::AfterOrOn => created_at >= cond.value,
    }
}

fn regex_matches(pattern: &str, actual: &str) -> bool {
    let patterns = compiled_patterns();
    if let Some(re) = patterns.get(pattern) {
        return re.is_match(actual);
    }
    match Regex::new(pattern) {
        Ok(re) => {
            let matched = re.is_match(actual);
            if patterns.len() >= MAX_CACHED_PATTERNS {
                patterns.clear();
            }
            patterns.insert(pattern.to_string(), re);
            matched
        }
        Err(err) => {
            debug!(pattern = %pattern, error = %err, "Unmatchable regex in selector");
            false
        }
    }
}
