//! Variables at the three precedence layers
//!
//! Resource variables override deployment variables, which override values
//! from variable sets attached to the environment.

use crate::selector::Condition;
use crate::{DeploymentId, ResourceId, SystemId, VariableSetId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a variable's value is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableValue {
    /// Literal value
    Direct { value: serde_json::Value },

    /// Sensitive literal, base64 ciphertext
    Encrypted { ciphertext: String },

    /// Path into a related resource, resolved through relationship rules
    Reference {
        reference: String,
        path: Vec<String>,
        #[serde(default)]
        default: Option<serde_json::Value>,
    },
}

impl VariableValue {
    pub fn direct(value: impl Into<serde_json::Value>) -> Self {
        Self::Direct {
            value: value.into(),
        }
    }

    pub fn reference(reference: impl Into<String>, path: &[&str]) -> Self {
        Self::Reference {
            reference: reference.into(),
            path: path.iter().map(|s| s.to_string()).collect(),
            default: None,
        }
    }
}

/// Variable scoped to a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceVariable {
    pub id: Uuid,
    pub resource_id: ResourceId,
    pub key: String,
    pub value: VariableValue,
    pub sensitive: bool,
}

impl ResourceVariable {
    pub fn new(resource_id: ResourceId, key: impl Into<String>, value: VariableValue) -> Self {
        let sensitive = matches!(value, VariableValue::Encrypted { .. });
        Self {
            id: Uuid::new_v4(),
            resource_id,
            key: key.into(),
            value,
            sensitive,
        }
    }
}

/// Variable declared by a deployment
///
/// Values are tried in order; the first whose selector matches the resource
/// wins, falling back to the designated default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVariable {
    pub id: Uuid,
    pub deployment_id: DeploymentId,
    pub key: String,
    pub description: String,
    pub values: Vec<DeploymentVariableValue>,
    pub default_value_id: Option<Uuid>,
}

impl DeploymentVariable {
    pub fn new(deployment_id: DeploymentId, key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            deployment_id,
            key: key.into(),
            description: String::new(),
            values: Vec::new(),
            default_value_id: None,
        }
    }

    pub fn with_value(mut self, value: DeploymentVariableValue) -> Self {
        self.values.push(value);
        self
    }

    pub fn with_default(mut self, value: DeploymentVariableValue) -> Self {
        self.default_value_id = Some(value.id);
        self.values.push(value);
        self
    }

    pub fn default_value(&self) -> Option<&DeploymentVariableValue> {
        let id = self.default_value_id?;
        self.values.iter().find(|v| v.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVariableValue {
    pub id: Uuid,
    pub value: VariableValue,
    pub sensitive: bool,

    /// `None` never matches by selector; such a value can only serve as default
    pub resource_selector: Option<Condition>,
}

impl DeploymentVariableValue {
    pub fn new(value: VariableValue) -> Self {
        let sensitive = matches!(value, VariableValue::Encrypted { .. });
        Self {
            id: Uuid::new_v4(),
            value,
            sensitive,
            resource_selector: None,
        }
    }

    pub fn with_selector(mut self, selector: Condition) -> Self {
        self.resource_selector = Some(selector);
        self
    }
}

/// Named set of values attached to environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSet {
    pub id: VariableSetId,
    pub system_id: SystemId,
    pub name: String,
    pub values: Vec<VariableSetValue>,
}

impl VariableSet {
    pub fn new(system_id: SystemId, name: impl Into<String>) -> Self {
        Self {
            id: VariableSetId::generate(),
            system_id,
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: VariableValue) -> Self {
        let sensitive = matches!(value, VariableValue::Encrypted { .. });
        self.values.push(VariableSetValue {
            key: key.into(),
            value,
            sensitive,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSetValue {
    pub key: String,
    pub value: VariableValue,
    pub sensitive: bool,
}
