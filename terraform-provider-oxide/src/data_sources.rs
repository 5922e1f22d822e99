//! Terraform Data Sources for Oxide
//!
//! Read-only lookups of VPCs and subnets by name.

use crate::client::ControlPlane;
use crate::resources::{api_error, timestamp, ResourceResult, ResourceState};
use crate::schema::{ResourceSchema, SchemaAttribute, SchemaBlock};
use crate::timeouts::{timeouts_attribute, Phase, Timeouts};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Data source trait
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Data source type name
    fn type_name(&self) -> &str;

    fn schema(&self) -> ResourceSchema;

    /// Look up the object described by `config`
    async fn read(
        &self,
        client: &dyn ControlPlane,
        config: &ResourceState,
    ) -> ResourceResult<ResourceState>;
}

fn computed_string(description: &str) -> SchemaAttribute {
    SchemaAttribute::string()
        .with_description(description)
        .computed()
}

fn lookup_key(description: &str) -> SchemaAttribute {
    SchemaAttribute::string()
        .with_description(description)
        .required()
}

// ============================================================================
// oxide_vpc
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct VpcModel {
    project_name: String,
    name: String,
    id: Option<String>,
    description: Option<String>,
    dns_name: Option<String>,
    ipv6_prefix: Option<String>,
    project_id: Option<String>,
    system_router_id: Option<String>,
    time_created: Option<String>,
    time_modified: Option<String>,
    timeouts: Option<Timeouts>,
}

pub struct VpcDataSource;

#[async_trait]
impl DataSource for VpcDataSource {
    fn type_name(&self) -> &str {
        "oxide_vpc"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_description("Retrieves information about a VPC")
            .with_attribute("project_name", lookup_key("Name of the project the VPC belongs to"))
            .with_attribute("name", lookup_key("Name of the VPC"))
            .with_attribute("id", computed_string("Unique, immutable, system-controlled identifier"))
            .with_attribute("description", computed_string("Description of the VPC"))
            .with_attribute("dns_name", computed_string("DNS name of the VPC"))
            .with_attribute("ipv6_prefix", computed_string("IPv6 prefix of the VPC"))
            .with_attribute("project_id", computed_string("ID of the project the VPC belongs to"))
            .with_attribute(
                "system_router_id",
                computed_string("ID of the VPC's system router"),
            )
            .with_attribute("time_created", computed_string("Timestamp of when the VPC was created"))
            .with_attribute(
                "time_modified",
                computed_string("Timestamp of when the VPC was last modified"),
            )
            .with_attribute("timeouts", timeouts_attribute(&[Phase::Read]));

        ResourceSchema::new(0, block)
    }

    async fn read(
        &self,
        client: &dyn ControlPlane,
        config: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let mut model: VpcModel = config.decode()?;
        let deadline = Timeouts::deadline(model.timeouts.as_ref(), Phase::Read, "read vpc")
            .map_err(|d| vec![d])?;

        let vpc = deadline
            .run(client.vpc_view(&model.name, Some(&model.project_name)))
            .await
            .map_err(|e| vec![api_error("Unable to read VPC", &e)])?;
        tracing::trace!(vpc_id = %vpc.id, name = %model.name, "read vpc");

        model.id = Some(vpc.id);
        model.description = Some(vpc.description);
        model.dns_name = Some(vpc.dns_name);
        model.ipv6_prefix = Some(vpc.ipv6_prefix);
        model.project_id = Some(vpc.project_id);
        model.system_router_id = Some(vpc.system_router_id);
        model.time_created = Some(timestamp(&vpc.time_created));
        model.time_modified = Some(timestamp(&vpc.time_modified));

        ResourceState::encode(&model)
    }
}

// ============================================================================
// oxide_vpc_subnet
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct VpcSubnetModel {
    project_name: String,
    vpc_name: String,
    name: String,
    id: Option<String>,
    description: Option<String>,
    ipv4_block: Option<String>,
    ipv6_block: Option<String>,
    vpc_id: Option<String>,
    time_created: Option<String>,
    time_modified: Option<String>,
    timeouts: Option<Timeouts>,
}

pub struct VpcSubnetDataSource;

#[async_trait]
impl DataSource for VpcSubnetDataSource {
    fn type_name(&self) -> &str {
        "oxide_vpc_subnet"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_description("Retrieves information about a VPC subnet")
            .with_attribute("project_name", lookup_key("Name of the project the VPC belongs to"))
            .with_attribute("vpc_name", lookup_key("Name of the VPC the subnet belongs to"))
            .with_attribute("name", lookup_key("Name of the subnet"))
            .with_attribute("id", computed_string("Unique, immutable, system-controlled identifier"))
            .with_attribute("description", computed_string("Description of the subnet"))
            .with_attribute("ipv4_block", computed_string("IPv4 address range of the subnet"))
            .with_attribute("ipv6_block", computed_string("IPv6 address range of the subnet"))
            .with_attribute("vpc_id", computed_string("ID of the VPC the subnet belongs to"))
            .with_attribute(
                "time_created",
                computed_string("Timestamp of when the subnet was created"),
            )
            .with_attribute(
                "time_modified",
                computed_string("Timestamp of when the subnet was last modified"),
            )
            .with_attribute("timeouts", timeouts_attribute(&[Phase::Read]));

        ResourceSchema::new(0, block)
    }

    async fn read(
        &self,
        client: &dyn ControlPlane,
        config: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let mut model: VpcSubnetModel = config.decode()?;
        let deadline = Timeouts::deadline(model.timeouts.as_ref(), Phase::Read, "read vpc subnet")
            .map_err(|d| vec![d])?;

        let subnet = deadline
            .run(client.vpc_subnet_view(
                &model.name,
                Some(&model.vpc_name),
                Some(&model.project_name),
            ))
            .await
            .map_err(|e| vec![api_error("Unable to read VPC subnet", &e)])?;
        tracing::trace!(subnet_id = %subnet.id, vpc_id = %subnet.vpc_id, "read vpc subnet");

        model.id = Some(subnet.id);
        model.description = Some(subnet.description);
        model.ipv4_block = Some(subnet.ipv4_block);
        model.ipv6_block = Some(subnet.ipv6_block);
        model.vpc_id = Some(subnet.vpc_id);
        model.time_created = Some(timestamp(&subnet.time_created));
        model.time_modified = Some(timestamp(&subnet.time_modified));

        ResourceState::encode(&model)
    }
}

/// Get all available data sources
pub fn get_all_data_sources() -> Vec<Box<dyn DataSource>> {
    vec![Box::new(VpcDataSource), Box::new(VpcSubnetDataSource)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Failure, FakeControlPlane};
    use crate::validation::validate_config;
    use serde_json::json;

    fn config(value: serde_json::Value) -> ResourceState {
        ResourceState::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_read_vpc() {
        let client = FakeControlPlane::new().with_vpc("vpc-1", "default");
        let later = client.state().vpcs["vpc-1"].time_modified + chrono::Duration::hours(1);
        client.state().vpcs.get_mut("vpc-1").unwrap().time_modified = later;

        let state = VpcDataSource
            .read(&client, &config(json!({"project_name": "proj", "name": "default"})))
            .await
            .unwrap();

        assert_eq!(state.get_string("id").as_deref(), Some("vpc-1"));
        assert_eq!(state.get_string("project_id").as_deref(), Some("proj-1"));
        assert_eq!(state.get_string("system_router_id").as_deref(), Some("vpc-1-router"));
        assert_eq!(state.get_string("dns_name").as_deref(), Some("default"));
        assert_eq!(state.get_string("time_modified"), Some(timestamp(&later)));
        assert_ne!(state.get_string("time_created"), state.get_string("time_modified"));
        assert_eq!(client.calls(), vec!["vpc_view(default, proj)".to_string()]);
    }

    #[tokio::test]
    async fn test_read_missing_vpc() {
        let client = FakeControlPlane::new();
        let diagnostics = VpcDataSource
            .read(&client, &config(json!({"project_name": "proj", "name": "nope"})))
            .await
            .unwrap_err();
        assert_eq!(diagnostics[0].summary, "Unable to read VPC");
    }

    #[tokio::test]
    async fn test_read_subnet() {
        let client = FakeControlPlane::new()
            .with_vpc("vpc-1", "default")
            .with_subnet("sub-1", "default", "vpc-1");

        let state = VpcSubnetDataSource
            .read(
                &client,
                &config(json!({"project_name": "proj", "vpc_name": "default", "name": "default"})),
            )
            .await
            .unwrap();

        assert_eq!(state.get_string("id").as_deref(), Some("sub-1"));
        assert_eq!(state.get_string("vpc_id").as_deref(), Some("vpc-1"));
        assert_eq!(state.get_string("ipv4_block").as_deref(), Some("172.30.0.0/22"));
        assert_eq!(
            client.calls(),
            vec!["vpc_subnet_view(default, default, proj)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_read_subnet_failure() {
        let client = FakeControlPlane::new()
            .with_vpc("vpc-1", "default")
            .with_subnet("sub-1", "default", "vpc-1");
        client.fail("vpc_subnet_view", Failure::Api(500));

        let diagnostics = VpcSubnetDataSource
            .read(
                &client,
                &config(json!({"project_name": "proj", "vpc_name": "default", "name": "default"})),
            )
            .await
            .unwrap_err();
        assert!(diagnostics[0].detail.as_deref().unwrap().contains("500"));
    }

    #[test]
    fn test_lookup_keys_required() {
        let diagnostics = validate_config(&VpcSubnetDataSource.schema().block, &json!({"name": "x"}));
        assert_eq!(diagnostics.len(), 2);
        assert!(validate_config(&VpcDataSource.schema().block, &json!({"project_name": "p", "name": "x"}))
            .is_empty());
    }

    #[test]
    fn test_registry() {
        let names: Vec<String> = get_all_data_sources()
            .iter()
            .map(|d| d.type_name().to_string())
            .collect();
        assert_eq!(names, vec!["oxide_vpc", "oxide_vpc_subnet"]);
    }
}
