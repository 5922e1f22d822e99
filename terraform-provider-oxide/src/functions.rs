//! Provider-defined functions
//!
//! Functions are pure: they never see the control-plane client.

use crate::resources::{firewall_rules, firewall_rules_v0};
use crate::schema::{AttributeType, FunctionParameter, FunctionSchema};
use serde_json::Value;
use thiserror::Error;

/// A function failure attributed to one argument
#[derive(Error, Debug, Clone, PartialEq)]
#[error("argument {argument}: {message}")]
pub struct FunctionError {
    pub argument: usize,
    pub message: String,
}

impl FunctionError {
    pub fn new(argument: usize, message: impl Into<String>) -> Self {
        Self {
            argument,
            message: message.into(),
        }
    }
}

pub trait Function: Send + Sync {
    fn name(&self) -> &str;

    fn definition(&self) -> FunctionSchema;

    fn call(&self, arguments: &[Value]) -> Result<Value, FunctionError>;
}

/// Converts a JSON encoded list of firewall rules, as stored before rules
/// were keyed by name, into the map accepted by `oxide_vpc_firewall_rules`.
pub struct ToVpcFirewallRulesMap;

impl Function for ToVpcFirewallRulesMap {
    fn name(&self) -> &str {
        "to_vpc_firewall_rules_map"
    }

    fn definition(&self) -> FunctionSchema {
        FunctionSchema {
            summary: "Convert a list of firewall rules into a map keyed by rule name".to_string(),
            description: Some(
                "Takes the JSON encoding of a list of oxide_vpc_firewall_rules rules, each \
                 carrying a name, and returns the rules keyed by name. Ports may be numbers \
                 or strings; protocols may be names such as \"TCP\" or objects."
                    .to_string(),
            ),
            deprecation_message: Some(
                "Only meant for migrating existing configurations; it will be removed in a \
                 future release."
                    .to_string(),
            ),
            parameters: vec![FunctionParameter {
                name: "rules_json".to_string(),
                attr_type: AttributeType::String,
                description: Some("JSON encoded list of firewall rules".to_string()),
            }],
            return_type: AttributeType::Map(Box::new(firewall_rules::rule_block().object_type())),
        }
    }

    fn call(&self, arguments: &[Value]) -> Result<Value, FunctionError> {
        let json = arguments
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| FunctionError::new(0, "expected a JSON string"))?;

        let rules = firewall_rules_v0::rules_json_to_map(json)
            .map_err(|e| FunctionError::new(0, e.to_string()))?;
        tracing::debug!(rules = rules.len(), "converted firewall rules to map");

        serde_json::to_value(rules).map_err(|e| FunctionError::new(0, e.to_string()))
    }
}

/// Get all available functions
pub fn get_all_functions() -> Vec<Box<dyn Function>> {
    vec![Box::new(ToVpcFirewallRulesMap)]
}
