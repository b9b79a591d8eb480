//! Rudder Selector - Pure predicate evaluation over selector trees
//!
//! Every higher layer decides membership through this crate: environment
//! membership of resources, deployment narrowing, policy targeting and the
//! version selector rule.
//!
//! Evaluation never fails. Structural problems (nesting too deep, bad
//! regexes) are caught by [`validate`] before a selector is stored.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod matcher;
pub mod subject;
pub mod validate;

pub use error::{Result, SelectorError};
pub use matcher::{deployment_matches, environment_matches, matches};
pub use subject::Selectable;
pub use validate::{validate, MAX_DEPTH};
