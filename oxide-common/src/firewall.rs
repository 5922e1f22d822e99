//! VPC firewall rule types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum VpcFirewallRuleAction: "firewall rule action" {
        Allow => "allow",
        Deny => "deny",
    }
}

string_enum! {
    pub enum VpcFirewallRuleDirection: "firewall rule direction" {
        Inbound => "inbound",
        Outbound => "outbound",
    }
}

string_enum! {
    pub enum VpcFirewallRuleStatus: "firewall rule status" {
        Enabled => "enabled",
        Disabled => "disabled",
    }
}

string_enum! {
    /// Kind of entity named by a host filter or a rule target
    pub enum VpcFirewallRuleEntityType: "firewall entity type" {
        Vpc => "vpc",
        Subnet => "subnet",
        Instance => "instance",
        Ip => "ip",
        IpNet => "ip_net",
    }
}

string_enum! {
    pub enum VpcFirewallRuleProtocolType: "firewall protocol" {
        Tcp => "tcp",
        Udp => "udp",
        Icmp => "icmp",
    }
}

/// Host filter: traffic to or from this entity matches the rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VpcFirewallRuleHostFilter {
    #[serde(rename = "type")]
    pub kind: VpcFirewallRuleEntityType,
    pub value: String,
}

/// Target the rule applies to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VpcFirewallRuleTarget {
    #[serde(rename = "type")]
    pub kind: VpcFirewallRuleEntityType,
    pub value: String,
}

/// ICMP match parameters; `code` is a single code or an inclusive range like `1-3`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VpcFirewallIcmpFilter {
    pub icmp_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Protocol filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum VpcFirewallRuleProtocol {
    Tcp,
    Udp,
    Icmp(Option<VpcFirewallIcmpFilter>),
}

impl VpcFirewallRuleProtocol {
    pub fn protocol_type(&self) -> VpcFirewallRuleProtocolType {
        match self {
            VpcFirewallRuleProtocol::Tcp => VpcFirewallRuleProtocolType::Tcp,
            VpcFirewallRuleProtocol::Udp => VpcFirewallRuleProtocolType::Udp,
            VpcFirewallRuleProtocol::Icmp(_) => VpcFirewallRuleProtocolType::Icmp,
        }
    }
}

/// Filters narrowing which packets a rule matches. Absent lists match anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VpcFirewallRuleFilter {
    #[serde(default)]
    pub hosts: Option<Vec<VpcFirewallRuleHostFilter>>,
    /// Single ports (`"80"`) or inclusive ranges (`"8000-8080"`)
    #[serde(default)]
    pub ports: Option<Vec<String>>,
    #[serde(default)]
    pub protocols: Option<Vec<VpcFirewallRuleProtocol>>,
}

/// A firewall rule as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcFirewallRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub action: VpcFirewallRuleAction,
    pub direction: VpcFirewallRuleDirection,
    pub filters: VpcFirewallRuleFilter,
    pub priority: u16,
    pub status: VpcFirewallRuleStatus,
    pub targets: Vec<VpcFirewallRuleTarget>,
    pub vpc_id: String,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

/// One rule inside a rule set replacement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VpcFirewallRuleUpdate {
    pub name: String,
    pub description: String,
    pub action: VpcFirewallRuleAction,
    pub direction: VpcFirewallRuleDirection,
    pub filters: VpcFirewallRuleFilter,
    pub priority: u16,
    pub status: VpcFirewallRuleStatus,
    pub targets: Vec<VpcFirewallRuleTarget>,
}

/// Body of a rule set replacement. `rules` is always sent, `[]` clears the set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VpcFirewallRuleUpdateParams {
    pub rules: Vec<VpcFirewallRuleUpdate>,
}

/// The complete rule set of a VPC
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpcFirewallRules {
    pub rules: Vec<VpcFirewallRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_update_still_sends_rules() {
        let body = serde_json::to_value(VpcFirewallRuleUpdateParams::default()).unwrap();
        assert_eq!(body, serde_json::json!({"rules": []}));
    }

    #[test]
    fn test_protocol_wire_shape() {
        let tcp = serde_json::to_value(VpcFirewallRuleProtocol::Tcp).unwrap();
        assert_eq!(tcp, serde_json::json!({"type": "tcp"}));

        let icmp = serde_json::to_value(VpcFirewallRuleProtocol::Icmp(Some(
            VpcFirewallIcmpFilter {
                icmp_type: 0,
                code: Some("1-3".into()),
            },
        )))
        .unwrap();
        assert_eq!(
            icmp,
            serde_json::json!({"type": "icmp", "value": {"icmp_type": 0, "code": "1-3"}})
        );

        let parsed: VpcFirewallRuleProtocol =
            serde_json::from_value(serde_json::json!({"type": "icmp", "value": null})).unwrap();
        assert_eq!(parsed, VpcFirewallRuleProtocol::Icmp(None));
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!(
            "ip_net".parse::<VpcFirewallRuleEntityType>().unwrap(),
            VpcFirewallRuleEntityType::IpNet
        );
        assert!("router".parse::<VpcFirewallRuleEntityType>().is_err());
    }
}
