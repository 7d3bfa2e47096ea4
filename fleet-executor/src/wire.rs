//! Typed response bodies for each hypervisor endpoint.
//!
//! Every endpoint wraps its payload as `{"data": ...}`. A body that does not
//! match the expected shape is an [`ExecutorError::UnexpectedResponse`], never
//! a silently defaulted value.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ExecutorError;

/// Terminal task phase reported by the task-status endpoint.
pub const TASK_PHASE_STOPPED: &str = "stopped";

/// Name of the loopback interface as reported by the guest agent.
pub const LOOPBACK_INTERFACE: &str = "lo";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Decode the `data` member of a response body from `endpoint`.
///
/// # Errors
/// Returns [`ExecutorError::UnexpectedResponse`] if the body is not JSON, has
/// no `data` member, or `data` does not match `T`.
pub fn decode<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, ExecutorError> {
    serde_json::from_str::<Envelope<T>>(body)
        .map(|envelope| envelope.data)
        .map_err(|e| ExecutorError::UnexpectedResponse {
            endpoint: endpoint.to_owned(),
            reason: e.to_string(),
        })
}

/// `POST /access/ticket`
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TicketData {
    pub ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_token: String,
    pub username: String,
}

/// One entry of `GET /nodes/{node}/qemu`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VmSummary {
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub cpus: Option<u32>,
}

impl VmSummary {
    /// Creates a summary with no allocation details.
    pub fn new(vmid: u32, name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            vmid,
            name: Some(name.into()),
            status: status.into(),
            maxmem: None,
            cpus: None,
        }
    }

    /// The VM's name, or `vm-<vmid>` for unnamed VMs.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("vm-{}", self.vmid))
    }
}

/// `GET /nodes/{node}/tasks/{upid}/status`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[non_exhaustive]
pub struct TaskStatus {
    /// Phase: `running` or `stopped`.
    pub status: String,
    /// Present once the task has stopped.
    #[serde(default)]
    pub exitstatus: Option<String>,
}

impl TaskStatus {
    /// Whether the task has reached its terminal phase.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status == TASK_PHASE_STOPPED
    }
}

/// `GET /nodes/{node}/qemu/{vmid}/agent/network-get-interfaces`
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct GuestAgentResult {
    pub result: Vec<GuestInterface>,
}

/// A network interface reported by the guest agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct GuestInterface {
    pub name: String,
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<GuestIpAddress>,
}

impl GuestInterface {
    /// Creates an interface with the given addresses.
    pub fn new(name: impl Into<String>, ip_addresses: Vec<GuestIpAddress>) -> Self {
        Self {
            name: name.into(),
            ip_addresses,
        }
    }
}

/// One address on a guest interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct GuestIpAddress {
    /// `ipv4` or `ipv6`.
    #[serde(rename = "ip-address-type")]
    pub address_type: String,
    #[serde(rename = "ip-address")]
    pub address: String,
    #[serde(default)]
    pub prefix: Option<u8>,
}

impl GuestIpAddress {
    /// An IPv4 entry.
    pub fn ipv4(address: impl Into<String>) -> Self {
        Self {
            address_type: "ipv4".to_owned(),
            address: address.into(),
            prefix: None,
        }
    }

    /// An IPv6 entry.
    pub fn ipv6(address: impl Into<String>) -> Self {
        Self {
            address_type: "ipv6".to_owned(),
            address: address.into(),
            prefix: None,
        }
    }
}

/// `GET /nodes/{node}/status`, reduced to the fields the engine reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct NodeStatus {
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub pveversion: Option<String>,
}

/// Parse the `data` of `GET /cluster/nextid`, which may be a string or a number.
///
/// # Errors
/// Returns [`ExecutorError::UnexpectedResponse`] if `data` is neither a
/// decimal string nor a non-negative integer that fits in `u32`.
pub fn parse_next_vmid(body: &str) -> Result<u32, ExecutorError> {
    const ENDPOINT: &str = "/cluster/nextid";
    let value: serde_json::Value = decode(ENDPOINT, body)?;
    let parsed = match &value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    };
    parsed.ok_or_else(|| ExecutorError::UnexpectedResponse {
        endpoint: ENDPOINT.to_owned(),
        reason: format!("expected a VM id, got {value}"),
    })
}
