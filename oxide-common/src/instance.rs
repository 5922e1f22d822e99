//! Instance, disk and network interface types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// Run state of an instance as reported by the control plane
    pub enum InstanceState: "instance state" {
        Creating => "creating",
        Starting => "starting",
        Running => "running",
        Stopping => "stopping",
        Stopped => "stopped",
        Rebooting => "rebooting",
        Migrating => "migrating",
        Repairing => "repairing",
        Failed => "failed",
        Destroyed => "destroyed",
    }
}

string_enum! {
    /// What the control plane does when an instance fails
    pub enum InstanceAutoRestartPolicy: "auto restart policy" {
        BestEffort => "best_effort",
        Never => "never",
    }
}

string_enum! {
    /// Kind of external IP attached at create time
    pub enum ExternalIpKind: "external IP type" {
        Ephemeral => "ephemeral",
        Floating => "floating",
    }
}

/// An instance as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub description: String,
    pub hostname: String,
    pub memory: u64,
    pub ncpus: u16,
    pub project_id: String,
    pub run_state: InstanceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_disk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_restart_policy: Option<InstanceAutoRestartPolicy>,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
    pub time_run_state_updated: DateTime<Utc>,
}

/// Request body for creating an instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceCreate {
    pub name: String,
    pub description: String,
    pub hostname: String,
    pub memory: u64,
    pub ncpus: u16,
    pub start: bool,
    /// Base64 encoded cloud-init payload
    #[serde(default)]
    pub user_data: String,
    #[serde(default)]
    pub disks: Vec<InstanceDiskAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_disk: Option<InstanceDiskAttachment>,
    #[serde(default)]
    pub external_ips: Vec<ExternalIpCreate>,
    pub network_interfaces: InstanceNetworkInterfaceAttachment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_keys: Option<Vec<String>>,
    #[serde(default)]
    pub anti_affinity_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_restart_policy: Option<InstanceAutoRestartPolicy>,
}

/// Request body for an in-place instance update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceUpdate {
    pub boot_disk: Option<String>,
    pub auto_restart_policy: Option<InstanceAutoRestartPolicy>,
    pub memory: u64,
    pub ncpus: u16,
}

/// Disk reference inside an instance create request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceDiskAttachment {
    Attach { name: String },
}

/// External IP requested at instance create time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExternalIpCreate {
    /// Allocate from `pool`, or the silo default pool when absent
    Ephemeral {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pool: Option<String>,
    },
    Floating { floating_ip: String },
}

/// How network interfaces are set up when an instance is created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum InstanceNetworkInterfaceAttachment {
    Create(Vec<InstanceNetworkInterfaceCreate>),
    Default,
    None,
}

/// Request body for creating a network interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceNetworkInterfaceCreate {
    pub name: String,
    pub description: String,
    pub subnet_name: String,
    pub vpc_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// A network interface as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceNetworkInterface {
    pub id: String,
    pub name: String,
    pub description: String,
    pub instance_id: String,
    pub subnet_id: String,
    pub vpc_id: String,
    pub ip: String,
    pub mac: String,
    pub primary: bool,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

/// A disk as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    pub id: String,
    pub name: String,
    pub description: String,
    pub project_id: String,
    pub size: u64,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

/// Body for the disk attach and detach endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskPath {
    pub disk: String,
}

/// Anti-affinity group membership as listed for an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiAffinityGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// SSH public key as listed for an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}
