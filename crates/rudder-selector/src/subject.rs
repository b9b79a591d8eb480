//! Subjects a selector can be evaluated against

use chrono::{DateTime, Utc};
use rudder_types::{Deployment, DeploymentVersion, Environment, Resource};
use std::collections::BTreeMap;

/// Field access used by the matcher
///
/// A field the subject does not carry returns `None`, and any leaf that
/// needs it does not match.
pub trait Selectable {
    fn selector_id(&self) -> String;

    fn selector_name(&self) -> Option<&str>;

    fn selector_identifier(&self) -> Option<&str> {
        None
    }

    fn selector_kind(&self) -> Option<&str> {
        None
    }

    fn selector_version(&self) -> Option<&str> {
        None
    }

    fn selector_tag(&self) -> Option<&str> {
        None
    }

    fn selector_metadata(&self) -> Option<&BTreeMap<String, String>> {
        None
    }

    fn selector_created_at(&self) -> DateTime<Utc>;

    /// Soft-deleted subjects never match
    fn is_soft_deleted(&self) -> bool {
        false
    }
}

impl Selectable for Resource {
    fn selector_id(&self) -> String {
        self.id.to_string()
    }

    fn selector_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn selector_identifier(&self) -> Option<&str> {
        Some(&self.identifier)
    }

    fn selector_kind(&self) -> Option<&str> {
        Some(&self.kind)
    }

    fn selector_version(&self) -> Option<&str> {
        Some(&self.version)
    }

    fn selector_metadata(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.metadata)
    }

    fn selector_created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn is_soft_deleted(&self) -> bool {
        self.is_deleted()
    }
}

impl Selectable for Environment {
    fn selector_id(&self) -> String {
        self.id.to_string()
    }

    fn selector_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn selector_created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Selectable for Deployment {
    fn selector_id(&self) -> String {
        self.id.to_string()
    }

    fn selector_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn selector_identifier(&self) -> Option<&str> {
        Some(&self.slug)
    }

    fn selector_created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Selectable for DeploymentVersion {
    fn selector_id(&self) -> String {
        self.id.to_string()
    }

    fn selector_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn selector_tag(&self) -> Option<&str> {
        Some(&self.tag)
    }

    fn selector_metadata(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.metadata)
    }

    fn selector_created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
