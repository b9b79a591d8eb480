//! Variable resolution for a release target
//!
//! Each key declared by the deployment is resolved from three layers, highest
//! precedence first:
//!
//! 1. a resource variable with the same key
//! 2. the first deployment value whose resource selector matches, else the
//!    deployment variable's default value
//! 3. the first variable set attached to the environment that defines the key
//!
//! A layer whose value cannot be materialized (a reference with no related
//! resource and no default) falls through to the next one.

use crate::error::Result;
use crate::secrets::SecretCipher;
use rudder_selector::matches;
use rudder_store::Store;
use rudder_types::{
    Deployment, DeploymentVariable, Environment, ReleaseVariable, Resource, ResourceVariable,
    VariableSet, VariableSetId, VariableValue,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Layer a variable's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableSource {
    Resource,
    Deployment,
    DeploymentDefault,
    VariableSet(VariableSetId),
}

/// Plaintext value of one variable
#[derive(Clone, PartialEq)]
pub struct ResolvedVariable {
    pub key: String,
    pub value: Value,
    pub sensitive: bool,
    pub source: VariableSource,
}

impl fmt::Debug for ResolvedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("ResolvedVariable");
        out.field("key", &self.key);
        if self.sensitive {
            out.field("value", &"<redacted>");
        } else {
            out.field("value", &self.value);
        }
        out.field("sensitive", &self.sensitive)
            .field("source", &self.source)
            .finish()
    }
}

/// Effective variables of a release target, keyed by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedVariables {
    variables: BTreeMap<String, ResolvedVariable>,
}

impl ResolvedVariables {
    pub fn get(&self, key: &str) -> Option<&ResolvedVariable> {
        self.variables.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedVariable> {
        self.variables.values()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    fn insert(&mut self, variable: ResolvedVariable) {
        self.variables.insert(variable.key.clone(), variable);
    }

    /// SHA-256 over the canonical JSON of the plaintext snapshot
    pub fn content_hash(&self) -> Result<String> {
        let canonical: serde_json::Map<String, Value> = self
            .variables
            .values()
            .map(|v| {
                (
                    v.key.clone(),
                    serde_json::json!({ "sensitive": v.sensitive, "value": v.value }),
                )
            })
            .collect();
        let bytes = serde_json::to_vec(&Value::Object(canonical))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Snapshot rows for persistence; sensitive values are encrypted
    pub fn to_release_variables(&self, cipher: &dyn SecretCipher) -> Result<Vec<ReleaseVariable>> {
        self.variables
            .values()
            .map(|v| -> Result<ReleaseVariable> {
                let value = if v.sensitive {
                    Value::String(cipher.encrypt(&serde_json::to_string(&v.value)?)?)
                } else {
                    v.value.clone()
                };
                Ok(ReleaseVariable {
                    key: v.key.clone(),
                    value,
                    sensitive: v.sensitive,
                })
            })
            .collect()
    }
}

/// Resolves the variable snapshot of a (resource, deployment, environment)
pub struct VariableResolver {
    store: Arc<dyn Store>,
    cipher: Arc<dyn SecretCipher>,
}

impl VariableResolver {
    pub fn new(store: Arc<dyn Store>, cipher: Arc<dyn SecretCipher>) -> Self {
        Self { store, cipher }
    }

    #[instrument(skip_all, fields(resource_id = %resource.id, deployment_id = %deployment.id))]
    pub async fn resolve(
        &self,
        resource: &Resource,
        deployment: &Deployment,
        environment: &Environment,
    ) -> Result<ResolvedVariables> {
        let declared = self
            .store
            .list_deployment_variables(&deployment.id)
            .await?;
        let mut resolved = ResolvedVariables::default();
        if declared.is_empty() {
            return Ok(resolved);
        }

        let resource_vars: HashMap<String, ResourceVariable> = self
            .store
            .list_resource_variables(&resource.id)
            .await?
            .into_iter()
            .map(|v| (v.key.clone(), v))
            .collect();

        let mut sets = Vec::with_capacity(environment.variable_set_ids.len());
        for id in &environment.variable_set_ids {
            if let Some(set) = self.store.get_variable_set(id).await? {
                sets.push(set);
            }
        }

        for variable in &declared {
            match self
                .resolve_key(variable, resource, &resource_vars, &sets)
                .await?
            {
                Some(value) => {
                    debug!(key = %value.key, source = ?value.source, "Variable resolved");
                    resolved.insert(value);
                }
                None => debug!(key = %variable.key, "Variable has no value for this target"),
            }
        }

        Ok(resolved)
    }

    async fn resolve_key(
        &self,
        variable: &DeploymentVariable,
        resource: &Resource,
        resource_vars: &HashMap<String, ResourceVariable>,
        sets: &[VariableSet],
    ) -> Result<Option<ResolvedVariable>> {
        let key = &variable.key;
        let found = |value: Value, sensitive: bool, source: VariableSource| ResolvedVariable {
            key: key.clone(),
            value,
            sensitive,
            source,
        };

        if let Some(own) = resource_vars.get(key) {
            if let Some(value) = self.materialize(&own.value, resource).await? {
                return Ok(Some(found(value, own.sensitive, VariableSource::Resource)));
            }
        }

        let selected = variable
            .values
            .iter()
            .find(|v| {
                v.resource_selector
                    .as_ref()
                    .is_some_and(|selector| matches(resource, selector))
            })
            .map(|v| (v, VariableSource::Deployment))
            .or_else(|| {
                variable
                    .default_value()
                    .map(|v| (v, VariableSource::DeploymentDefault))
            });
        if let Some((value, source)) = selected {
            if let Some(plain) = self.materialize(&value.value, resource).await? {
                return Ok(Some(found(plain, value.sensitive, source)));
            }
        }

        for set in sets {
            let Some(entry) = set.values.iter().find(|v| &v.key == key) else {
                continue;
            };
            if let Some(plain) = self.materialize(&entry.value, resource).await? {
                return Ok(Some(found(
                    plain,
                    entry.sensitive,
                    VariableSource::VariableSet(set.id),
                )));
            }
        }

        Ok(None)
    }

    /// Plaintext of a stored value, `None` when a reference cannot be followed
    async fn materialize(&self, value: &VariableValue, resource: &Resource) -> Result<Option<Value>> {
        match value {
            VariableValue::Direct { value } => Ok(Some(value.clone())),
            VariableValue::Encrypted { ciphertext } => {
                let plain = self.cipher.decrypt(ciphertext)?;
                Ok(Some(
                    serde_json::from_str(&plain).unwrap_or(Value::String(plain)),
                ))
            }
            VariableValue::Reference {
                reference,
                path,
                default,
            } => {
                let related = self.store.related_targets(&resource.id, reference).await?;
                // Live targets win over deleted ones, then the most recently updated
                let target = related
                    .iter()
                    .max_by_key(|r| (!r.is_deleted(), r.updated_at));
                let value = target.and_then(|t| extract(t, path));
                if value.is_none() {
                    debug!(
                        reference = %reference,
                        path = %path.join("."),
                        has_default = default.is_some(),
                        "Reference unresolved"
                    );
                }
                Ok(value.or_else(|| default.clone()))
            }
        }
    }
}

/// Value at `path` within a resource: a top-level attribute, a metadata key,
/// or a walk into the config document
fn extract(resource: &Resource, path: &[String]) -> Option<Value> {
    let (head, rest) = path.split_first()?;
    let attribute = |s: &str| rest.is_empty().then(|| Value::String(s.to_string()));

    match head.as_str() {
        "id" => attribute(&resource.id.to_string()),
        "name" => attribute(&resource.name),
        "identifier" => attribute(&resource.identifier),
        "kind" => attribute(&resource.kind),
        "version" => attribute(&resource.version),
        "metadata" => match rest {
            [key] => resource.metadata.get(key).map(|v| Value::String(v.clone())),
            _ => None,
        },
        "config" => rest
            .iter()
            .try_fold(&resource.config, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
            .cloned(),
        _ => None,
    }
}
