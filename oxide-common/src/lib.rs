//! Types shared between the Oxide control-plane client and the Terraform provider
//!
//! Only the slice of the Oxide API that the provider drives is modelled here:
//! instances and their children, VPCs, subnets and VPC firewall rules.

#[macro_use]
mod macros;

pub mod firewall;
pub mod instance;
pub mod vpc;

pub use firewall::*;
pub use instance::*;
pub use vpc::*;

use serde::{Deserialize, Serialize};

/// Page size used for every list call.
///
/// The API is paginated, but iterating pages has been unreliable upstream, so
/// list calls ask for one very large page instead.
pub const LIST_LIMIT: u32 = 1_000_000_000;

/// A single page of results from a list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsPage<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
}

impl<T> ResultsPage<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}

/// Error body returned by the API on any non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub message: String,
}

/// Errors raised while interpreting API values
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid {kind} {value:?}, expected one of: {expected}")]
    UnknownVariant {
        kind: &'static str,
        value: String,
        expected: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
