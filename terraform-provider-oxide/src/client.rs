//! Oxide API Client for Terraform Provider
//!
//! [`ControlPlane`] names every call the resources make. [`OxideClient`] is the
//! HTTP implementation; tests swap in an in-memory fake.

use async_trait::async_trait;
use oxide_common::{
    AntiAffinityGroup, ApiErrorBody, Disk, DiskPath, Instance, InstanceCreate,
    InstanceNetworkInterface, InstanceNetworkInterfaceCreate, InstanceUpdate, ResultsPage,
    SshKey, Vpc, VpcFirewallRuleUpdateParams, VpcFirewallRules, VpcSubnet,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid host URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Invalid token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
    #[error("{operation} did not finish within {timeout:?}")]
    DeadlineExceeded {
        operation: String,
        timeout: Duration,
    },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// The control-plane calls the provider makes.
///
/// Identifiers may be names or UUIDs; callers pass UUIDs whenever they hold
/// one. List calls return a single page of up to
/// [`oxide_common::LIST_LIMIT`] items.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn instance_create(&self, project: &str, body: &InstanceCreate) -> Result<Instance>;
    async fn instance_view(&self, instance: &str) -> Result<Instance>;
    async fn instance_update(&self, instance: &str, body: &InstanceUpdate) -> Result<Instance>;
    async fn instance_start(&self, instance: &str) -> Result<Instance>;
    async fn instance_stop(&self, instance: &str) -> Result<Instance>;
    async fn instance_delete(&self, instance: &str) -> Result<()>;

    async fn instance_disk_list(&self, instance: &str) -> Result<ResultsPage<Disk>>;
    async fn instance_disk_attach(&self, instance: &str, disk: &str) -> Result<Disk>;
    async fn instance_disk_detach(&self, instance: &str, disk: &str) -> Result<Disk>;

    async fn instance_network_interface_list(
        &self,
        instance: &str,
    ) -> Result<ResultsPage<InstanceNetworkInterface>>;
    async fn instance_network_interface_view(
        &self,
        instance: &str,
        interface: &str,
    ) -> Result<InstanceNetworkInterface>;
    async fn instance_network_interface_create(
        &self,
        instance: &str,
        body: &InstanceNetworkInterfaceCreate,
    ) -> Result<InstanceNetworkInterface>;
    async fn instance_network_interface_delete(&self, interface: &str) -> Result<()>;

    async fn instance_anti_affinity_group_list(
        &self,
        instance: &str,
    ) -> Result<ResultsPage<AntiAffinityGroup>>;
    async fn anti_affinity_group_member_instance_add(
        &self,
        group: &str,
        instance: &str,
    ) -> Result<()>;
    async fn anti_affinity_group_member_instance_delete(
        &self,
        group: &str,
        instance: &str,
    ) -> Result<()>;
    async fn instance_ssh_public_key_list(&self, instance: &str) -> Result<ResultsPage<SshKey>>;

    async fn disk_view(&self, disk: &str) -> Result<Disk>;
    async fn vpc_view(&self, vpc: &str, project: Option<&str>) -> Result<Vpc>;
    async fn vpc_subnet_view(
        &self,
        subnet: &str,
        vpc: Option<&str>,
        project: Option<&str>,
    ) -> Result<VpcSubnet>;

    async fn vpc_firewall_rules_view(&self, vpc: &str) -> Result<VpcFirewallRules>;
    async fn vpc_firewall_rules_update(
        &self,
        vpc: &str,
        body: &VpcFirewallRuleUpdateParams,
    ) -> Result<VpcFirewallRules>;
}

/// Oxide API Client
#[derive(Clone)]
pub struct OxideClient {
    client: reqwest::Client,
    base_url: Url,
}

impl OxideClient {
    /// Create a client for `host` authenticating with `token`
    pub fn new(host: &str, token: &str, insecure_skip_verify: bool) -> Result<Self> {
        let base_url = Url::parse(host)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("terraform-provider-oxide/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn host(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        tracing::debug!(path, "GET");
        let request = self.client.get(self.url(path)?).query(query);
        self.send(request).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T> {
        tracing::debug!(path, "POST");
        let request = self.client.post(self.url(path)?).query(query).json(body);
        self.send(request).await
    }

    async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T> {
        tracing::debug!(path, "PUT");
        let request = self.client.put(self.url(path)?).query(query).json(body);
        self.send(request).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        tracing::debug!(path, "DELETE");
        let response = self.client.delete(self.url(path)?).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Map a non-2xx response onto a [`ClientError`]
    async fn error_from(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(body) if body.request_id.is_empty() => body.message,
            Ok(body) => format!("{} (request id {})", body.message, body.request_id),
            Err(_) => text,
        };

        match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::UNAUTHORIZED => ClientError::AuthFailed(message),
            _ => ClientError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }
}

/// [`oxide_common::LIST_LIMIT`] as a query value
const LIMIT: &str = "1000000000";

#[async_trait]
impl ControlPlane for OxideClient {
    async fn instance_create(&self, project: &str, body: &InstanceCreate) -> Result<Instance> {
        self.post("/v1/instances", &[("project", project)], body).await
    }

    async fn instance_view(&self, instance: &str) -> Result<Instance> {
        self.get(&format!("/v1/instances/{}", instance), &[]).await
    }

    async fn instance_update(&self, instance: &str, body: &InstanceUpdate) -> Result<Instance> {
        self.put(&format!("/v1/instances/{}", instance), &[], body)
            .await
    }

    async fn instance_start(&self, instance: &str) -> Result<Instance> {
        self.post(&format!("/v1/instances/{}/start", instance), &[], &())
            .await
    }

    async fn instance_stop(&self, instance: &str) -> Result<Instance> {
        self.post(&format!("/v1/instances/{}/stop", instance), &[], &())
            .await
    }

    async fn instance_delete(&self, instance: &str) -> Result<()> {
        self.delete(&format!("/v1/instances/{}", instance)).await
    }

    async fn instance_disk_list(&self, instance: &str) -> Result<ResultsPage<Disk>> {
        self.get(
            &format!("/v1/instances/{}/disks", instance),
            &[("limit", LIMIT)],
        )
        .await
    }

    async fn instance_disk_attach(&self, instance: &str, disk: &str) -> Result<Disk> {
        let body = DiskPath {
            disk: disk.to_string(),
        };
        self.post(&format!("/v1/instances/{}/disks/attach", instance), &[], &body)
            .await
    }

    async fn instance_disk_detach(&self, instance: &str, disk: &str) -> Result<Disk> {
        let body = DiskPath {
            disk: disk.to_string(),
        };
        self.post(&format!("/v1/instances/{}/disks/detach", instance), &[], &body)
            .await
    }

    async fn instance_network_interface_list(
        &self,
        instance: &str,
    ) -> Result<ResultsPage<InstanceNetworkInterface>> {
        self.get(
            "/v1/network-interfaces",
            &[("instance", instance), ("limit", LIMIT)],
        )
        .await
    }

    async fn instance_network_interface_view(
        &self,
        instance: &str,
        interface: &str,
    ) -> Result<InstanceNetworkInterface> {
        self.get(
            &format!("/v1/network-interfaces/{}", interface),
            &[("instance", instance)],
        )
        .await
    }

    async fn instance_network_interface_create(
        &self,
        instance: &str,
        body: &InstanceNetworkInterfaceCreate,
    ) -> Result<InstanceNetworkInterface> {
        self.post("/v1/network-interfaces", &[("instance", instance)], body)
            .await
    }

    async fn instance_network_interface_delete(&self, interface: &str) -> Result<()> {
        self.delete(&format!("/v1/network-interfaces/{}", interface))
            .await
    }

    async fn instance_anti_affinity_group_list(
        &self,
        instance: &str,
    ) -> Result<ResultsPage<AntiAffinityGroup>> {
        self.get(
            &format!("/v1/instances/{}/anti-affinity-groups", instance),
            &[("limit", LIMIT)],
        )
        .await
    }

    async fn anti_affinity_group_member_instance_add(
        &self,
        group: &str,
        instance: &str,
    ) -> Result<()> {
        self.post::<serde_json::Value, _>(
            &format!(
                "/v1/anti-affinity-groups/{}/members/instance/{}",
                group, instance
            ),
            &[],
            &(),
        )
        .await
        .map(|_| ())
    }

    async fn anti_affinity_group_member_instance_delete(
        &self,
        group: &str,
        instance: &str,
    ) -> Result<()> {
        self.delete(&format!(
            "/v1/anti-affinity-groups/{}/members/instance/{}",
            group, instance
        ))
        .await
    }

    async fn instance_ssh_public_key_list(&self, instance: &str) -> Result<ResultsPage<SshKey>> {
        self.get(
            &format!("/v1/instances/{}/ssh-public-keys", instance),
            &[("limit", LIMIT)],
        )
        .await
    }

    async fn disk_view(&self, disk: &str) -> Result<Disk> {
        self.get(&format!("/v1/disks/{}", disk), &[]).await
    }

    async fn vpc_view(&self, vpc: &str, project: Option<&str>) -> Result<Vpc> {
        let query: Vec<(&str, &str)> = project.map(|p| ("project", p)).into_iter().collect();
        self.get(&format!("/v1/vpcs/{}", vpc), &query).await
    }

    async fn vpc_subnet_view(
        &self,
        subnet: &str,
        vpc: Option<&str>,
        project: Option<&str>,
    ) -> Result<VpcSubnet> {
        let query: Vec<(&str, &str)> = [("vpc", vpc), ("project", project)]
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();
        self.get(&format!("/v1/vpc-subnets/{}", subnet), &query)
            .await
    }

    async fn vpc_firewall_rules_view(&self, vpc: &str) -> Result<VpcFirewallRules> {
        self.get("/v1/vpc-firewall-rules", &[("vpc", vpc)]).await
    }

    async fn vpc_firewall_rules_update(
        &self,
        vpc: &str,
        body: &VpcFirewallRuleUpdateParams,
    ) -> Result<VpcFirewallRules> {
        self.put("/v1/vpc-firewall-rules", &[("vpc", vpc)], body)
            .await
    }
}
