//! VPC and subnet types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A VPC as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub name: String,
    pub description: String,
    pub dns_name: String,
    pub ipv6_prefix: String,
    pub project_id: String,
    pub system_router_id: String,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

/// A VPC subnet as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcSubnet {
    pub id: String,
    pub name: String,
    pub description: String,
    pub vpc_id: String,
    pub ipv4_block: String,
    pub ipv6_block: String,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}
