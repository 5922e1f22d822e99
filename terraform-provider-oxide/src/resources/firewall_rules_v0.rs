//! Schema version 0 of oxide_vpc_firewall_rules
//!
//! Version 0 stored the rules as a list of named rules whose protocols were
//! plain strings (`"TCP"`). Version 1 keys the rules by name and stores each
//! protocol as `{type, icmp_type, icmp_code}`. The conversion here is pure:
//! upgrading state never calls the control plane.

use super::firewall_rules::{EntityModel, FiltersModel, FirewallRuleModel, ProtocolModel};
use super::{ResourceResult, ResourceState};
use crate::schema::Diagnostic;
use crate::timeouts::Timeouts;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("invalid firewall rules: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate firewall rule name {0:?}")]
    DuplicateName(String),
}

/// A port as written under version 0: `80` or `"80"`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PortV0 {
    Number(u64),
    Text(String),
}

impl From<PortV0> for String {
    fn from(port: PortV0) -> Self {
        match port {
            PortV0::Number(n) => n.to_string(),
            PortV0::Text(s) => s,
        }
    }
}

/// A protocol as written under version 0: `"TCP"` or `{type = "icmp", ...}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ProtocolV0 {
    Name(String),
    Object(ProtocolModel),
}

impl From<ProtocolV0> for ProtocolModel {
    fn from(protocol: ProtocolV0) -> Self {
        match protocol {
            ProtocolV0::Name(name) => ProtocolModel {
                kind: name.to_lowercase(),
                icmp_type: None,
                icmp_code: None,
            },
            ProtocolV0::Object(object) => ProtocolModel {
                kind: object.kind.to_lowercase(),
                ..object
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FiltersV0 {
    hosts: Option<Vec<EntityModel>>,
    ports: Option<Vec<PortV0>>,
    protocols: Option<Vec<ProtocolV0>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleV0 {
    name: String,
    action: String,
    description: String,
    direction: String,
    filters: Option<FiltersV0>,
    priority: i64,
    status: String,
    targets: Vec<EntityModel>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StateV0 {
    id: Option<String>,
    vpc_id: String,
    rules: Option<Vec<RuleV0>>,
    time_created: Option<String>,
    time_modified: Option<String>,
    timeouts: Option<Timeouts>,
}

/// Version 1 state, written field by field so the upgrade does not depend on
/// how the current model evolves
#[derive(Debug, Serialize)]
struct StateV1 {
    id: Option<String>,
    vpc_id: String,
    rules: Option<BTreeMap<String, FirewallRuleModel>>,
    time_created: Option<String>,
    time_modified: Option<String>,
    timeouts: Option<Timeouts>,
}

impl From<RuleV0> for FirewallRuleModel {
    fn from(rule: RuleV0) -> Self {
        let filters = rule.filters.map(|f| FiltersModel {
            hosts: f.hosts,
            ports: f.ports.map(|ports| ports.into_iter().map(String::from).collect()),
            protocols: f
                .protocols
                .map(|protocols| protocols.into_iter().map(ProtocolModel::from).collect()),
        });
        FirewallRuleModel {
            action: rule.action,
            description: rule.description,
            direction: rule.direction,
            filters,
            priority: rule.priority,
            status: rule.status,
            targets: rule.targets,
        }
    }
}

/// Key a version 0 rule list by rule name
pub fn rules_to_map(rules: Vec<RuleV0>) -> Result<BTreeMap<String, FirewallRuleModel>, ConversionError> {
    let mut map = BTreeMap::new();
    for rule in rules {
        let name = rule.name.clone();
        if map.insert(name.clone(), FirewallRuleModel::from(rule)).is_some() {
            return Err(ConversionError::DuplicateName(name));
        }
    }
    Ok(map)
}

/// Parse a JSON encoded version 0 rule list and key it by rule name
pub fn rules_json_to_map(json: &str) -> Result<BTreeMap<String, FirewallRuleModel>, ConversionError> {
    let rules: Vec<RuleV0> = serde_json::from_str(json)?;
    rules_to_map(rules)
}

/// Upgrade raw version 0 state to version 1
pub fn upgrade(raw: Value) -> ResourceResult<ResourceState> {
    let fail = |e: ConversionError| {
        vec![Diagnostic::error("Unable to upgrade firewall rules state").with_detail(&e.to_string())]
    };

    let prior: StateV0 = serde_json::from_value(raw).map_err(|e| fail(e.into()))?;
    let rules = prior.rules.map(rules_to_map).transpose().map_err(fail)?;
    tracing::debug!(
        vpc_id = %prior.vpc_id,
        rules = rules.as_ref().map_or(0, BTreeMap::len),
        "upgraded firewall rules state from version 0"
    );

    ResourceState::encode(&StateV1 {
        id: prior.id,
        vpc_id: prior.vpc_id,
        rules,
        time_created: prior.time_created,
        time_modified: prior.time_modified,
        timeouts: prior.timeouts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::firewall_rules::FirewallRulesModel;
    use serde_json::json;

    fn v0_state() -> Value {
        json!({
            "id": "vpc-1",
            "vpc_id": "vpc-1",
            "rules": [{
                "name": "allow-http-https",
                "description": "Allow",
                "action": "allow",
                "direction": "inbound",
                "priority": 50,
                "status": "enabled",
                "targets": [{"type": "subnet", "value": "default"}],
                "filters": {
                    "ports": ["80", 443],
                    "protocols": ["TCP", "UDP"],
                    "hosts": [{"type": "vpc", "value": "default"}]
                }
            }],
            "time_created": "2024-01-01T00:00:00Z",
            "time_modified": "2024-01-01T00:00:00Z",
            "timeouts": null
        })
    }

    #[test]
    fn test_upgrade_keys_rules_by_name() {
        let upgraded: FirewallRulesModel = upgrade(v0_state()).unwrap().decode().unwrap();

        assert_eq!(upgraded.id.as_deref(), Some("vpc-1"));
        assert_eq!(upgraded.time_created.as_deref(), Some("2024-01-01T00:00:00Z"));
        let rules = upgraded.rules.unwrap();
        assert_eq!(rules.len(), 1);

        let rule = &rules["allow-http-https"];
        assert_eq!(rule.description, "Allow");
        assert_eq!(rule.priority, 50);
        assert_eq!(rule.targets[0].kind, "subnet");
        let filters = rule.filters.as_ref().unwrap();
        assert_eq!(filters.ports, Some(vec!["80".to_string(), "443".to_string()]));
        assert_eq!(
            filters.protocols,
            Some(vec![
                ProtocolModel {
                    kind: "tcp".to_string(),
                    icmp_type: None,
                    icmp_code: None
                },
                ProtocolModel {
                    kind: "udp".to_string(),
                    icmp_type: None,
                    icmp_code: None
                },
            ])
        );
        assert_eq!(filters.hosts.as_ref().unwrap()[0].value, "default");
    }

    #[test]
    fn test_upgrade_without_rules() {
        let upgraded = upgrade(json!({"id": "vpc-1", "vpc_id": "vpc-1", "rules": null})).unwrap();
        assert_eq!(upgraded.get("rules"), Some(&Value::Null));
    }

    #[test]
    fn test_object_protocols_are_accepted() {
        let map = rules_json_to_map(
            r#"[{"name": "icmp", "filters": {"protocols": [{"type": "ICMP", "icmp_type": 8}]}}]"#,
        )
        .unwrap();
        let protocols = map["icmp"].filters.clone().unwrap().protocols.unwrap();
        assert_eq!(protocols[0].kind, "icmp");
        assert_eq!(protocols[0].icmp_type, Some(8));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = rules_json_to_map(r#"[{"name": "a"}, {"name": "b"}, {"name": "a"}]"#).unwrap_err();
        assert!(matches!(err, ConversionError::DuplicateName(ref name) if name == "a"));

        let mut state = v0_state();
        let rule = state["rules"][0].clone();
        state["rules"].as_array_mut().unwrap().push(rule);
        let diagnostics = upgrade(state).unwrap_err();
        assert!(diagnostics[0].detail.as_deref().unwrap().contains("allow-http-https"));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            rules_json_to_map("{not json").unwrap_err(),
            ConversionError::Json(_)
        ));
        assert!(upgrade(json!({"rules": "nope"})).is_err());
    }
}
