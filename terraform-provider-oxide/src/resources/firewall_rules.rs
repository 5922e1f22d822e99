//! oxide_vpc_firewall_rules resource
//!
//! Owns the complete firewall rule set of one VPC. The API only replaces the
//! whole set, so create and update are the same PUT followed by a read back,
//! and delete PUTs an empty set.

use super::firewall_rules_v0;
use super::{api_error, timestamp, Applied, Resource, ResourceResult, ResourceState};
use crate::client::ControlPlane;
use crate::schema::{
    AttributeType, Diagnostic, NestingMode, ResourceSchema, SchemaAttribute, SchemaBlock,
    Validator,
};
use crate::timeouts::{timeouts_attribute, Phase, Timeouts};
use async_trait::async_trait;
use oxide_common::{
    VpcFirewallIcmpFilter, VpcFirewallRule, VpcFirewallRuleAction, VpcFirewallRuleDirection,
    VpcFirewallRuleEntityType, VpcFirewallRuleFilter, VpcFirewallRuleHostFilter,
    VpcFirewallRuleProtocol, VpcFirewallRuleProtocolType, VpcFirewallRuleStatus,
    VpcFirewallRuleTarget, VpcFirewallRuleUpdate, VpcFirewallRuleUpdateParams,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Current schema version; version 0 stored rules as a list
pub const SCHEMA_VERSION: i64 = 1;

/// Valid rule names, which double as the keys of the `rules` map
pub const RULE_NAME_PATTERN: &str = "^[a-z][a-zA-Z0-9-]{0,61}[a-zA-Z0-9]$";

/// Host filter or rule target as recorded in state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityModel {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolModel {
    #[serde(rename = "type")]
    pub kind: String,
    pub icmp_type: Option<i64>,
    pub icmp_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersModel {
    pub hosts: Option<Vec<EntityModel>>,
    pub ports: Option<Vec<String>>,
    pub protocols: Option<Vec<ProtocolModel>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallRuleModel {
    pub action: String,
    pub description: String,
    pub direction: String,
    pub filters: Option<FiltersModel>,
    pub priority: i64,
    pub status: String,
    pub targets: Vec<EntityModel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallRulesModel {
    pub id: Option<String>,
    pub vpc_id: String,
    pub rules: Option<BTreeMap<String, FirewallRuleModel>>,
    pub time_created: Option<String>,
    pub time_modified: Option<String>,
    pub timeouts: Option<Timeouts>,
}

fn rule_path(name: &str, fields: &[&str]) -> Vec<String> {
    ["rules", name]
        .iter()
        .chain(fields)
        .map(|s| s.to_string())
        .collect()
}

fn parse<T>(raw: &str, path: Vec<String>) -> Result<T, Diagnostic>
where
    T: FromStr<Err = oxide_common::Error>,
{
    raw.parse().map_err(|e: oxide_common::Error| {
        Diagnostic::error("Invalid Attribute Value")
            .with_detail(&e.to_string())
            .with_attribute(path)
    })
}

fn in_range<T: TryFrom<i64>>(value: i64, path: Vec<String>) -> Result<T, Diagnostic> {
    T::try_from(value).map_err(|_| {
        Diagnostic::error("Invalid Attribute Value")
            .with_detail(&format!("value {} is out of range", value))
            .with_attribute(path)
    })
}

impl ProtocolModel {
    fn to_protocol(&self, path: Vec<String>) -> Result<VpcFirewallRuleProtocol, Diagnostic> {
        let kind: VpcFirewallRuleProtocolType = parse(&self.kind, path.clone())?;
        Ok(match kind {
            VpcFirewallRuleProtocolType::Tcp => VpcFirewallRuleProtocol::Tcp,
            VpcFirewallRuleProtocolType::Udp => VpcFirewallRuleProtocol::Udp,
            VpcFirewallRuleProtocolType::Icmp => match (self.icmp_type, &self.icmp_code) {
                (None, None) => VpcFirewallRuleProtocol::Icmp(None),
                (None, Some(_)) => {
                    return Err(Diagnostic::error("Invalid Attribute Combination")
                        .with_detail("icmp_code requires icmp_type")
                        .with_attribute(path))
                }
                (Some(icmp_type), code) => {
                    VpcFirewallRuleProtocol::Icmp(Some(VpcFirewallIcmpFilter {
                        icmp_type: in_range(icmp_type, path)?,
                        code: code.clone(),
                    }))
                }
            },
        })
    }

    fn observed(protocol: &VpcFirewallRuleProtocol) -> Self {
        let (icmp_type, icmp_code) = match protocol {
            VpcFirewallRuleProtocol::Icmp(Some(filter)) => {
                (Some(i64::from(filter.icmp_type)), filter.code.clone())
            }
            _ => (None, None),
        };
        Self {
            kind: protocol.protocol_type().as_str().to_string(),
            icmp_type,
            icmp_code,
        }
    }
}

fn non_empty<T>(items: Option<Vec<T>>) -> Option<Vec<T>> {
    items.filter(|v| !v.is_empty())
}

impl FirewallRuleModel {
    /// Wire form of the rule called `name`
    pub fn to_update(&self, name: &str) -> Result<VpcFirewallRuleUpdate, Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();
        let mut check = |result: Result<(), Diagnostic>| {
            if let Err(d) = result {
                diagnostics.push(d);
            }
        };

        let mut update = VpcFirewallRuleUpdate {
            name: name.to_string(),
            description: self.description.clone(),
            action: VpcFirewallRuleAction::Allow,
            direction: VpcFirewallRuleDirection::Inbound,
            filters: VpcFirewallRuleFilter::default(),
            priority: 0,
            status: VpcFirewallRuleStatus::Enabled,
            targets: Vec::with_capacity(self.targets.len()),
        };

        check(parse(&self.action, rule_path(name, &["action"])).map(|v| update.action = v));
        check(parse(&self.direction, rule_path(name, &["direction"])).map(|v| update.direction = v));
        check(parse(&self.status, rule_path(name, &["status"])).map(|v| update.status = v));
        check(in_range(self.priority, rule_path(name, &["priority"])).map(|v| update.priority = v));

        for target in &self.targets {
            check(
                parse::<VpcFirewallRuleEntityType>(&target.kind, rule_path(name, &["targets"])).map(
                    |kind| {
                        update.targets.push(VpcFirewallRuleTarget {
                            kind,
                            value: target.value.clone(),
                        })
                    },
                ),
            );
        }

        if let Some(filters) = &self.filters {
            if let Some(hosts) = &filters.hosts {
                let mut parsed = Vec::with_capacity(hosts.len());
                for host in hosts {
                    check(
                        parse(&host.kind, rule_path(name, &["filters", "hosts"])).map(|kind| {
                            parsed.push(VpcFirewallRuleHostFilter {
                                kind,
                                value: host.value.clone(),
                            })
                        }),
                    );
                }
                update.filters.hosts = Some(parsed);
            }
            update.filters.ports = filters.ports.clone();
            if let Some(protocols) = &filters.protocols {
                let mut parsed = Vec::with_capacity(protocols.len());
                for protocol in protocols {
                    check(
                        protocol
                            .to_protocol(rule_path(name, &["filters", "protocols"]))
                            .map(|p| parsed.push(p)),
                    );
                }
                update.filters.protocols = Some(parsed);
            }
        }

        if diagnostics.is_empty() {
            Ok(update)
        } else {
            Err(diagnostics)
        }
    }

    /// State form of a rule read from the server
    pub fn observed(rule: &VpcFirewallRule) -> Self {
        let hosts = non_empty(rule.filters.hosts.clone()).map(|hosts| {
            hosts
                .iter()
                .map(|h| EntityModel {
                    kind: h.kind.as_str().to_string(),
                    value: h.value.clone(),
                })
                .collect::<Vec<_>>()
        });
        let ports = non_empty(rule.filters.ports.clone());
        let protocols = non_empty(rule.filters.protocols.clone())
            .map(|protocols| protocols.iter().map(ProtocolModel::observed).collect::<Vec<_>>());

        let filters = if hosts.is_none() && ports.is_none() && protocols.is_none() {
            None
        } else {
            Some(FiltersModel {
                hosts,
                ports,
                protocols,
            })
        };

        Self {
            action: rule.action.as_str().to_string(),
            description: rule.description.clone(),
            direction: rule.direction.as_str().to_string(),
            filters,
            priority: i64::from(rule.priority),
            status: rule.status.as_str().to_string(),
            targets: rule
                .targets
                .iter()
                .map(|t| EntityModel {
                    kind: t.kind.as_str().to_string(),
                    value: t.value.clone(),
                })
                .collect(),
        }
    }
}

impl FirewallRulesModel {
    fn has_rules(&self) -> bool {
        self.rules.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// Replacement body, rules in name order
    pub fn update_params(&self) -> ResourceResult<VpcFirewallRuleUpdateParams> {
        let mut params = VpcFirewallRuleUpdateParams::default();
        let mut diagnostics = Vec::new();

        for (name, rule) in self.rules.iter().flatten() {
            match rule.to_update(name) {
                Ok(update) => params.rules.push(update),
                Err(mut diags) => diagnostics.append(&mut diags),
            }
        }

        if diagnostics.is_empty() {
            Ok(params)
        } else {
            Err(diagnostics)
        }
    }

    /// Take the server's rule list as the source of truth
    fn apply(&mut self, rules: &[VpcFirewallRule]) {
        self.id = Some(self.vpc_id.clone());
        match rules.first() {
            Some(first) => {
                self.time_created = Some(timestamp(&first.time_created));
                self.time_modified = Some(timestamp(&first.time_modified));
            }
            None => {
                self.time_created = None;
                self.time_modified = None;
            }
        }

        if rules.is_empty() && self.rules.is_none() {
            return;
        }
        self.rules = Some(
            rules
                .iter()
                .map(|rule| (rule.name.clone(), FirewallRuleModel::observed(rule)))
                .collect(),
        );
    }
}

fn entity_block(description: &str) -> SchemaBlock {
    SchemaBlock::new()
        .with_description(description)
        .with_attribute(
            "type",
            SchemaAttribute::string()
                .required()
                .one_of(VpcFirewallRuleEntityType::values().as_slice()),
        )
        .with_attribute(
            "value",
            SchemaAttribute::string()
                .with_description("Name of the entity, or an IP address or block for ip and ip_net")
                .required(),
        )
}

/// Attributes of one firewall rule
pub(crate) fn rule_block() -> SchemaBlock {
    let protocol = SchemaBlock::new()
        .with_attribute(
            "type",
            SchemaAttribute::string()
                .required()
                .one_of(VpcFirewallRuleProtocolType::values().as_slice()),
        )
        .with_attribute(
            "icmp_type",
            SchemaAttribute::number()
                .with_description("ICMP message type, only for the icmp protocol")
                .optional()
                .with_validator(Validator::Between { min: 0, max: 255 }),
        )
        .with_attribute(
            "icmp_code",
            SchemaAttribute::string()
                .with_description("ICMP code or inclusive range of codes, e.g. \"1-3\"")
                .optional()
                .with_validator(Validator::AlsoRequires {
                    attributes: vec!["icmp_type".to_string()],
                }),
        );

    let filters = SchemaBlock::new()
        .with_attribute(
            "hosts",
            SchemaAttribute::nested(
                NestingMode::Set,
                entity_block("Traffic to or from these hosts matches the rule"),
            )
            .optional(),
        )
        .with_attribute(
            "ports",
            SchemaAttribute::set(AttributeType::String)
                .with_description("Single ports or inclusive port ranges, e.g. \"80\" or \"8000-8080\"")
                .optional(),
        )
        .with_attribute(
            "protocols",
            SchemaAttribute::nested(NestingMode::Set, protocol).optional(),
        );

    SchemaBlock::new()
        .with_attribute(
            "action",
            SchemaAttribute::string()
                .with_description("Whether matching traffic is allowed or denied")
                .required()
                .one_of(VpcFirewallRuleAction::values().as_slice()),
        )
        .with_attribute(
            "description",
            SchemaAttribute::string()
                .with_description("Description of the rule")
                .required(),
        )
        .with_attribute(
            "direction",
            SchemaAttribute::string()
                .required()
                .one_of(VpcFirewallRuleDirection::values().as_slice()),
        )
        .with_attribute(
            "filters",
            SchemaAttribute::nested(NestingMode::Single, filters)
                .with_description("Narrow the traffic the rule matches")
                .optional(),
        )
        .with_attribute(
            "priority",
            SchemaAttribute::number()
                .with_description("Rules are evaluated in ascending priority order")
                .required()
                .with_validator(Validator::Between { min: 0, max: 65535 }),
        )
        .with_attribute(
            "status",
            SchemaAttribute::string()
                .required()
                .one_of(VpcFirewallRuleStatus::values().as_slice()),
        )
        .with_attribute(
            "targets",
            SchemaAttribute::nested(
                NestingMode::Set,
                entity_block("Instances the rule applies to"),
            )
            .required(),
        )
}

/// Firewall rules resource
pub struct VpcFirewallRulesResource;

impl VpcFirewallRulesResource {
    pub fn new() -> Self {
        Self
    }

    /// PUT the planned set and record what the server holds afterwards
    async fn replace(
        &self,
        client: &dyn ControlPlane,
        planned: &ResourceState,
        phase: Phase,
    ) -> ResourceResult<Applied> {
        let plan: FirewallRulesModel = planned.decode()?;
        let body = plan.update_params()?;
        let deadline = Timeouts::deadline(
            plan.timeouts.as_ref(),
            phase,
            &format!("{} firewall rules", phase.as_str()),
        )
        .map_err(|d| vec![d])?;

        let replaced = deadline
            .run(client.vpc_firewall_rules_update(&plan.vpc_id, &body))
            .await
            .map_err(|e| vec![api_error("Unable to replace firewall rules", &e)])?;
        tracing::info!(vpc_id = %plan.vpc_id, rules = body.rules.len(), "replaced firewall rules");

        let mut state = plan.clone();
        let mut diagnostics = Vec::new();
        match deadline.run(client.vpc_firewall_rules_view(&plan.vpc_id)).await {
            Ok(observed) => state.apply(&observed.rules),
            Err(e) => {
                state.apply(&replaced.rules);
                diagnostics.push(
                    Diagnostic::warning("Unable to read firewall rules")
                        .with_detail(&format!("API error: {}", e)),
                );
            }
        }

        Ok(Applied::with_diagnostics(
            ResourceState::encode(&state)?,
            diagnostics,
        ))
    }
}

impl Default for VpcFirewallRulesResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for VpcFirewallRulesResource {
    fn type_name(&self) -> &str {
        "oxide_vpc_firewall_rules"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_description("Manages the complete set of firewall rules of a VPC")
            .with_attribute(
                "id",
                SchemaAttribute::string()
                    .with_description("Same as vpc_id")
                    .computed()
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "vpc_id",
                SchemaAttribute::string()
                    .with_description("ID of the VPC the rules apply to")
                    .required()
                    .requires_replace(),
            )
            .with_attribute(
                "rules",
                SchemaAttribute::nested(NestingMode::Map, rule_block())
                    .with_description("Firewall rules keyed by rule name")
                    .optional()
                    .with_validator(Validator::MapKeysMatch {
                        pattern: RULE_NAME_PATTERN.to_string(),
                        message: "rule names must start with a lowercase letter, contain only \
                                  letters, digits and dashes, not end with a dash, and be at \
                                  most 63 characters"
                            .to_string(),
                    }),
            )
            .with_attribute(
                "time_created",
                SchemaAttribute::string()
                    .with_description("Timestamp of when the first rule was created")
                    .computed(),
            )
            .with_attribute(
                "time_modified",
                SchemaAttribute::string()
                    .with_description("Timestamp of when the first rule was last modified")
                    .computed(),
            )
            .with_attribute(
                "timeouts",
                timeouts_attribute(&[Phase::Create, Phase::Read, Phase::Update, Phase::Delete]),
            );

        ResourceSchema::new(SCHEMA_VERSION, block)
    }

    async fn create(
        &self,
        client: &dyn ControlPlane,
        planned: &ResourceState,
    ) -> ResourceResult<Applied> {
        self.replace(client, planned, Phase::Create).await
    }

    async fn read(
        &self,
        client: &dyn ControlPlane,
        current: &ResourceState,
    ) -> ResourceResult<Option<ResourceState>> {
        let mut state: FirewallRulesModel = current.decode()?;
        if state.vpc_id.is_empty() {
            state.vpc_id = state.id.clone().unwrap_or_default();
        }
        let deadline = Timeouts::deadline(state.timeouts.as_ref(), Phase::Read, "read firewall rules")
            .map_err(|d| vec![d])?;

        let observed = match deadline.run(client.vpc_firewall_rules_view(&state.vpc_id)).await {
            Ok(observed) => observed,
            Err(e) if e.is_not_found() => {
                tracing::warn!(vpc_id = %state.vpc_id, "VPC not found, removing firewall rules from state");
                return Ok(None);
            }
            Err(e) => return Err(vec![api_error("Unable to read firewall rules", &e)]),
        };

        if observed.rules.is_empty() && state.has_rules() {
            tracing::warn!(vpc_id = %state.vpc_id, "firewall rules were removed outside of Terraform");
            return Ok(None);
        }

        state.apply(&observed.rules);
        tracing::trace!(vpc_id = %state.vpc_id, rules = observed.rules.len(), "read firewall rules");
        Ok(Some(ResourceState::encode(&state)?))
    }

    async fn update(
        &self,
        client: &dyn ControlPlane,
        _current: &ResourceState,
        planned: &ResourceState,
    ) -> ResourceResult<Applied> {
        self.replace(client, planned, Phase::Update).await
    }

    async fn delete(&self, client: &dyn ControlPlane, current: &ResourceState) -> ResourceResult<()> {
        let state: FirewallRulesModel = current.decode()?;
        let deadline =
            Timeouts::deadline(state.timeouts.as_ref(), Phase::Delete, "delete firewall rules")
                .map_err(|d| vec![d])?;

        match deadline
            .run(client.vpc_firewall_rules_update(
                &state.vpc_id,
                &VpcFirewallRuleUpdateParams::default(),
            ))
            .await
        {
            Ok(_) => tracing::info!(vpc_id = %state.vpc_id, "cleared firewall rules"),
            Err(e) if e.is_not_found() => {
                tracing::debug!(vpc_id = %state.vpc_id, "VPC already gone")
            }
            Err(e) => return Err(vec![api_error("Unable to delete firewall rules", &e)]),
        }
        Ok(())
    }

    fn upgrade_state(&self, version: i64, raw: Value) -> ResourceResult<ResourceState> {
        match version {
            0 => firewall_rules_v0::upgrade(raw),
            SCHEMA_VERSION => ResourceState::from_value(raw)
                .ok_or_else(|| vec![Diagnostic::error("Resource state is not an object")]),
            other => Err(vec![Diagnostic::error("Unable to upgrade resource state")
                .with_detail(&format!(
                    "oxide_vpc_firewall_rules has no schema version {}",
                    other
                ))]),
        }
    }

    fn import_state(&self, id: &str) -> ResourceState {
        let mut state = ResourceState::new();
        state.set("id", Value::String(id.to_string()));
        state.set("vpc_id", Value::String(id.to_string()));
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Failure, FakeControlPlane};
    use crate::validation::validate_config;
    use serde_json::json;

    fn state(value: Value) -> ResourceState {
        ResourceState::from_value(value).unwrap()
    }

    fn rule(priority: i64) -> Value {
        json!({
            "action": "allow",
            "description": "Allow web traffic",
            "direction": "inbound",
            "priority": priority,
            "status": "enabled",
            "targets": [{"type": "subnet", "value": "default"}],
            "filters": {
                "hosts": [{"type": "vpc", "value": "default"}],
                "ports": ["80", "8000-8080"],
                "protocols": [{"type": "tcp"}, {"type": "icmp", "icmp_type": 0, "icmp_code": "1-3"}]
            }
        })
    }

    fn planned(rules: Value) -> ResourceState {
        state(json!({"vpc_id": "vpc-1", "rules": rules}))
    }

    fn client() -> FakeControlPlane {
        FakeControlPlane::new().with_vpc("vpc-1", "default")
    }

    #[test]
    fn test_schema() {
        let schema = VpcFirewallRulesResource::new().schema();
        assert_eq!(schema.version, 1);
        assert!(schema.block.attributes["vpc_id"].requires_replace);

        let config = json!({"vpc_id": "vpc-1", "rules": {"allow-web": rule(50)}});
        assert!(validate_config(&schema.block, &config).is_empty());

        let bad = json!({
            "vpc_id": "vpc-1",
            "rules": {"Allow_Web": {
                "action": "allow", "description": "", "direction": "sideways",
                "priority": 70000, "status": "enabled",
                "targets": [{"type": "host", "value": "x"}],
                "filters": {"protocols": [{"type": "icmp", "icmp_code": "3"}]}
            }}
        });
        let diagnostics = validate_config(&schema.block, &bad);
        assert_eq!(diagnostics.len(), 5, "{:?}", diagnostics);
    }

    #[test]
    fn test_rule_conversion() {
        let model: FirewallRuleModel = serde_json::from_value(rule(50)).unwrap();
        let update = model.to_update("allow-web").unwrap();

        assert_eq!(update.name, "allow-web");
        assert_eq!(update.priority, 50);
        assert_eq!(update.targets[0].kind, VpcFirewallRuleEntityType::Subnet);
        assert_eq!(
            update.filters.protocols,
            Some(vec![
                VpcFirewallRuleProtocol::Tcp,
                VpcFirewallRuleProtocol::Icmp(Some(VpcFirewallIcmpFilter {
                    icmp_type: 0,
                    code: Some("1-3".to_string())
                })),
            ])
        );
    }

    #[test]
    fn test_rule_conversion_collects_errors() {
        let mut value = rule(70000);
        value["action"] = json!("permit");
        value["filters"]["protocols"] = json!([{"type": "icmp", "icmp_code": "1"}]);
        let model: FirewallRuleModel = serde_json::from_value(value).unwrap();

        let diagnostics = model.to_update("r").unwrap_err();
        let paths: Vec<Vec<String>> = diagnostics.iter().filter_map(|d| d.attribute.clone()).collect();
        assert_eq!(diagnostics.len(), 3);
        assert!(paths.contains(&rule_path("r", &["action"])));
        assert!(paths.contains(&rule_path("r", &["priority"])));
        assert!(paths.contains(&rule_path("r", &["filters", "protocols"])));
    }

    #[tokio::test]
    async fn test_create_records_server_rules() {
        let client = client();
        let applied = VpcFirewallRulesResource::new()
            .create(&client, &planned(json!({"allow-web": rule(50), "allow-ssh": rule(10)})))
            .await
            .unwrap();
        assert!(applied.diagnostics.is_empty());

        let model: FirewallRulesModel = applied.state.unwrap().decode().unwrap();
        assert_eq!(model.id.as_deref(), Some("vpc-1"));
        let rules = model.rules.unwrap();
        assert_eq!(rules.keys().collect::<Vec<_>>(), vec!["allow-ssh", "allow-web"]);
        assert_eq!(
            rules["allow-web"],
            serde_json::from_value::<FirewallRuleModel>(rule(50)).unwrap()
        );

        let first = client.state().firewall_rules["vpc-1"][0].clone();
        assert_eq!(model.time_created, Some(timestamp(&first.time_created)));
        assert_eq!(
            client.calls(),
            vec!["vpc_firewall_rules_update(vpc-1)", "vpc_firewall_rules_view(vpc-1)"]
        );
    }

    #[tokio::test]
    async fn test_update_replaces_whole_set() {
        let client = client();
        let resource = VpcFirewallRulesResource::new();
        let created = resource
            .create(&client, &planned(json!({"a": rule(10), "b": rule(20)})))
            .await
            .unwrap()
            .state
            .unwrap();
        client.clear_calls();

        let applied = resource
            .update(&client, &created, &planned(json!({"a": rule(15), "c": rule(30)})))
            .await
            .unwrap();

        assert_eq!(client.calls_to("vpc_firewall_rules_update").len(), 1);
        let body = client.state().rule_updates.last().cloned().unwrap();
        let sent: Vec<(String, u16)> = body.rules.iter().map(|r| (r.name.clone(), r.priority)).collect();
        assert_eq!(sent, vec![("a".to_string(), 15), ("c".to_string(), 30)]);

        let model: FirewallRulesModel = applied.state.unwrap().decode().unwrap();
        let rules = model.rules.unwrap();
        assert_eq!(rules.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(rules["a"].priority, 15);
    }

    #[tokio::test]
    async fn test_failed_read_back_keeps_put_result() {
        let client = client();
        client.fail("vpc_firewall_rules_view", Failure::Api(503));

        let applied = VpcFirewallRulesResource::new()
            .create(&client, &planned(json!({"a": rule(10)})))
            .await
            .unwrap();

        assert_eq!(applied.diagnostics.len(), 1);
        assert!(!applied.diagnostics[0].is_error());
        let model: FirewallRulesModel = applied.state.unwrap().decode().unwrap();
        assert!(model.rules.unwrap().contains_key("a"));
    }

    #[tokio::test]
    async fn test_empty_plan_sends_empty_list() {
        let client = client();
        let applied = VpcFirewallRulesResource::new()
            .create(&client, &state(json!({"vpc_id": "vpc-1"})))
            .await
            .unwrap();

        let body = serde_json::to_value(&client.state().rule_updates[0]).unwrap();
        assert_eq!(body, json!({"rules": []}));
        let model: FirewallRulesModel = applied.state.unwrap().decode().unwrap();
        assert_eq!(model.rules, None);
        assert_eq!(model.time_created, None);
    }

    #[tokio::test]
    async fn test_read_detects_external_removal() {
        let client = client();
        let resource = VpcFirewallRulesResource::new();
        let created = resource
            .create(&client, &planned(json!({"a": rule(10)})))
            .await
            .unwrap()
            .state
            .unwrap();

        let read = resource.read(&client, &created).await.unwrap().unwrap();
        assert_eq!(read, created);

        client.state().firewall_rules.insert("vpc-1".to_string(), Vec::new());
        assert!(resource.read(&client, &created).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_missing_vpc_removes_state() {
        let client = FakeControlPlane::new();
        let read = VpcFirewallRulesResource::new()
            .read(&client, &state(json!({"id": "vpc-9", "vpc_id": "vpc-9"})))
            .await
            .unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_delete_clears_rules() {
        let client = client();
        let resource = VpcFirewallRulesResource::new();
        let created = resource
            .create(&client, &planned(json!({"a": rule(10)})))
            .await
            .unwrap()
            .state
            .unwrap();

        resource.delete(&client, &created).await.unwrap();
        assert!(client.state().firewall_rules["vpc-1"].is_empty());

        // VPC already gone
        let gone = FakeControlPlane::new();
        resource.delete(&gone, &created).await.unwrap();

        client.fail("vpc_firewall_rules_update", Failure::Api(500));
        assert!(resource.delete(&client, &created).await.is_err());
    }

    #[tokio::test]
    async fn test_import_by_vpc_id() {
        let client = client();
        let resource = VpcFirewallRulesResource::new();
        resource
            .create(&client, &planned(json!({"a": rule(10)})))
            .await
            .unwrap();

        let imported = resource
            .read(&client, &resource.import_state("vpc-1"))
            .await
            .unwrap()
            .unwrap();
        let model: FirewallRulesModel = imported.decode().unwrap();
        assert_eq!(model.vpc_id, "vpc-1");
        assert!(model.rules.unwrap().contains_key("a"));
    }

    #[test]
    fn test_upgrade_rejects_unknown_version() {
        let resource = VpcFirewallRulesResource::new();
        assert!(resource.upgrade_state(7, json!({})).is_err());
        let current = resource.upgrade_state(1, json!({"id": "vpc-1"})).unwrap();
        assert_eq!(current.get_string("id").as_deref(), Some("vpc-1"));
    }
}
