//! Structural validation of selectors

use crate::error::{Result, SelectorError};
use regex::Regex;
use rudder_types::{Condition, MetadataOperator, StringOperator};

/// Maximum nesting depth of comparison/negation nodes
pub const MAX_DEPTH: usize = 5;

/// Reject selectors that are too deep or contain unusable leaves
pub fn validate(selector: &Condition) -> Result<()> {
    let depth = selector.depth();
    if depth > MAX_DEPTH {
        return Err(SelectorError::TooDeep {
            depth,
            max: MAX_DEPTH,
        });
    }
    check_leaves(selector)
}

fn check_leaves(condition: &Condition) -> Result<()> {
    match condition {
        Condition::Comparison { conditions, .. } => conditions.iter().try_for_each(check_leaves),
        Condition::Not { condition } => check_leaves(condition),
        Condition::Metadata(meta) => match (meta.operator, meta.value.as_deref()) {
            (MetadataOperator::Null, _) => Ok(()),
            (_, None) => Err(SelectorError::MissingValue {
                key: meta.key.clone(),
            }),
            (MetadataOperator::Regex, Some(pattern)) => check_regex(pattern),
            _ => Ok(()),
        },
        Condition::Name(c) | Condition::Identifier(c) | Condition::Version(c) | Condition::Tag(c)
            if c.operator == StringOperator::Regex =>
        {
            check_regex(&c.value)
        }
        _ => Ok(()),
    }
}

fn check_regex(pattern: &str) -> Result<()> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| SelectorError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_types::MetadataCondition;

    fn nest(depth: usize) -> Condition {
        (0..depth).fold(Condition::kind("web"), |inner, _| {
            Condition::and(vec![inner])
        })
    }

    #[test]
    fn test_depth_limit() {
        assert!(validate(&nest(MAX_DEPTH)).is_ok());
        assert_eq!(
            validate(&nest(MAX_DEPTH + 1)),
            Err(SelectorError::TooDeep {
                depth: MAX_DEPTH + 1,
                max: MAX_DEPTH
            })
        );
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let bad = Condition::and(vec![Condition::name(StringOperator::Regex, "([a-z")]);
        assert!(matches!(
            validate(&bad),
            Err(SelectorError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_metadata_value_required() {
        let missing = Condition::Metadata(MetadataCondition {
            key: "tier".into(),
            operator: MetadataOperator::Equals,
            value: None,
        });
        assert_eq!(
            validate(&missing),
            Err(SelectorError::MissingValue { key: "tier".into() })
        );
        assert!(validate(&Condition::metadata_null("tier")).is_ok());
    }
}
