use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{VmId, VmName};

/// Coarse lifecycle status of a VM.
///
/// `Nonexistent → Stopped ⇄ Running → Deleted`, with `Deleted` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum VmStatus {
    /// Powered off.
    Stopped,
    /// Powered on.
    Running,
    /// Destroyed on the hypervisor. Terminal.
    Deleted,
    /// Any status the hypervisor reports that is not mapped above.
    Unknown,
}

impl VmStatus {
    /// Map the hypervisor's status string onto the coarse status.
    #[must_use]
    pub fn from_hypervisor(status: &str) -> Self {
        match status {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted view of one VM as last observed by a lifecycle operation.
///
/// Downstream consumers read the latest `VmRecord` for a name instead of
/// querying the hypervisor. Prior versions are retained as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct VmRecord {
    /// Hypervisor-assigned identity at the time of observation.
    pub vmid: VmId,
    /// Caller-assigned identity.
    pub name: VmName,
    /// Coarse status after the operation.
    pub status: VmStatus,
    /// First routable IPv4 address reported by the guest agent, if any.
    pub ip: Option<Ipv4Addr>,
    /// Configured memory in bytes.
    pub allocated_memory_bytes: Option<u64>,
    /// Configured vCPU count.
    pub allocated_cpu_count: Option<u32>,
    /// Newline-joined operator log of the operation that produced this record.
    pub last_operation_log: String,
    /// When this record was observed.
    pub observed_at: DateTime<Utc>,
}

impl VmRecord {
    /// Create a record observed now with no IP, allocation, or log.
    #[must_use]
    pub fn new(vmid: VmId, name: VmName, status: VmStatus) -> Self {
        Self {
            vmid,
            name,
            status,
            ip: None,
            allocated_memory_bytes: None,
            allocated_cpu_count: None,
            last_operation_log: String::new(),
            observed_at: Utc::now(),
        }
    }
}
