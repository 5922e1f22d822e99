//! Terraform Resources for Oxide
//!
//! Defines the resources that can be managed via Terraform.

pub(crate) mod firewall_rules;
pub(crate) mod firewall_rules_v0;
mod instance;
mod instance_children;

pub use firewall_rules::VpcFirewallRulesResource;
pub use instance::InstanceResource;

use crate::client::{ClientError, ControlPlane};
use crate::plan::{self, PlannedChange};
use crate::schema::{Diagnostic, ResourceSchema};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Result type for resource operations
pub type ResourceResult<T> = Result<T, Vec<Diagnostic>>;

/// Resource state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub values: HashMap<String, Value>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// State from a JSON object; `None` for anything else, including `null`
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                values: map.into_iter().collect(),
            }),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Decode into a typed model
    pub fn decode<T: DeserializeOwned>(&self) -> ResourceResult<T> {
        serde_json::from_value(self.to_value()).map_err(|e| {
            vec![Diagnostic::error("Unable to decode resource state").with_detail(&e.to_string())]
        })
    }

    /// Encode a typed model
    pub fn encode<T: Serialize>(model: &T) -> ResourceResult<Self> {
        serde_json::to_value(model)
            .ok()
            .and_then(Self::from_value)
            .ok_or_else(|| vec![Diagnostic::error("Unable to encode resource state")])
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }
}

/// Result of a create or update that reached the control plane.
///
/// `state` is what the host must record even when `diagnostics` carries
/// errors, because the upstream object was already changed.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    pub state: Option<ResourceState>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Applied {
    pub fn with_diagnostics(state: ResourceState, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            state: Some(state),
            diagnostics,
        }
    }
}

/// Diagnostic for a failed control-plane call
pub fn api_error(summary: &str, err: &ClientError) -> Diagnostic {
    Diagnostic::error(summary).with_detail(&format!("API error: {}", err))
}

/// Resource trait
#[async_trait]
pub trait Resource: Send + Sync {
    /// Resource type name
    fn type_name(&self) -> &str;

    /// Get the schema for this resource
    fn schema(&self) -> ResourceSchema;

    /// Create a new resource
    async fn create(
        &self,
        client: &dyn ControlPlane,
        planned: &ResourceState,
    ) -> ResourceResult<Applied>;

    /// Read an existing resource. `None` means it no longer exists.
    async fn read(
        &self,
        client: &dyn ControlPlane,
        current: &ResourceState,
    ) -> ResourceResult<Option<ResourceState>>;

    /// Update an existing resource
    async fn update(
        &self,
        client: &dyn ControlPlane,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ResourceResult<Applied>;

    /// Delete a resource
    async fn delete(&self, client: &dyn ControlPlane, current: &ResourceState)
        -> ResourceResult<()>;

    /// Plan changes
    fn plan_change(
        &self,
        current: Option<&ResourceState>,
        proposed: &ResourceState,
    ) -> ResourceResult<PlannedChange> {
        Ok(plan::plan_resource_change(
            &self.schema().block,
            current,
            proposed,
        ))
    }

    /// Upgrade state recorded under an older schema version
    fn upgrade_state(&self, version: i64, raw: Value) -> ResourceResult<ResourceState> {
        let current = self.schema().version;
        if version != current {
            return Err(vec![Diagnostic::error("Unable to upgrade resource state")
                .with_detail(&format!(
                    "{} has no upgrade from schema version {} to {}",
                    self.type_name(),
                    version,
                    current
                ))]);
        }
        ResourceState::from_value(raw)
            .ok_or_else(|| vec![Diagnostic::error("Resource state is not an object")])
    }

    /// Seed state for `terraform import`; a read fills in the rest
    fn import_state(&self, id: &str) -> ResourceState {
        let mut state = ResourceState::new();
        state.set("id", Value::String(id.to_string()));
        state
    }
}

/// Get all available resources
pub fn get_all_resources() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(InstanceResource::new()),
        Box::new(VpcFirewallRulesResource::new()),
    ]
}

/// RFC 3339 timestamp as stored in state
pub(crate) fn timestamp(t: &chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}
