//! Selector expression tree
//!
//! A selector is a boolean tree of comparison nodes over leaf conditions.
//! The same tree is evaluated against resources, environments, deployments
//! and deployment versions; evaluation lives in `rudder-selector`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Selector condition tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Condition {
    /// AND/OR over child conditions
    Comparison {
        operator: ComparisonOperator,
        conditions: Vec<Condition>,
    },

    /// Negation of a child condition
    Not { condition: Box<Condition> },

    /// Key/value metadata predicate
    Metadata(MetadataCondition),

    /// Subject name predicate
    Name(StringCondition),

    /// Resource identifier predicate
    Identifier(StringCondition),

    /// Resource kind equality
    Kind { value: String },

    /// Resource schema version predicate
    Version(StringCondition),

    /// Deployment version tag predicate
    Tag(StringCondition),

    /// Exact id equality
    Id { value: String },

    /// Creation timestamp predicate
    CreatedAt(DateCondition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataCondition {
    pub key: String,
    pub operator: MetadataOperator,
    /// Ignored for [`MetadataOperator::Null`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    /// Matches when the key is absent
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringCondition {
    pub operator: StringOperator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StringOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateCondition {
    pub operator: DateOperator,
    pub value: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateOperator {
    Before,
    After,
    BeforeOrOn,
    AfterOrOn,
}

impl Condition {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::Comparison {
            operator: ComparisonOperator::And,
            conditions,
        }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::Comparison {
            operator: ComparisonOperator::Or,
            conditions,
        }
    }

    pub fn not(condition: Condition) -> Self {
        Self::Not {
            condition: Box::new(condition),
        }
    }

    pub fn kind(value: impl Into<String>) -> Self {
        Self::Kind {
            value: value.into(),
        }
    }

    pub fn metadata_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Metadata(MetadataCondition {
            key: key.into(),
            operator: MetadataOperator::Equals,
            value: Some(value.into()),
        })
    }

    pub fn metadata_null(key: impl Into<String>) -> Self {
        Self::Metadata(MetadataCondition {
            key: key.into(),
            operator: MetadataOperator::Null,
            value: None,
        })
    }

    pub fn name(operator: StringOperator, value: impl Into<String>) -> Self {
        Self::Name(StringCondition {
            operator,
            value: value.into(),
        })
    }

    pub fn tag(operator: StringOperator, value: impl Into<String>) -> Self {
        Self::Tag(StringCondition {
            operator,
            value: value.into(),
        })
    }

    /// Nesting depth of comparison/negation nodes; a bare leaf is depth 0
    pub fn depth(&self) -> usize {
        match self {
            Self::Comparison { conditions, .. } => {
                1 + conditions.iter().map(Condition::depth).max().unwrap_or(0)
            }
            Self::Not { condition } => 1 + condition.depth(),
            _ => 0,
        }
    }
}
