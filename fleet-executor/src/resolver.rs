//! Name → VM id resolution.
//!
//! VM ids are hypervisor-assigned and can change across delete/create cycles,
//! so every operation resolves the caller's name fresh from the VM list.

use fleet_core::{AuthSession, VmId, VmName, VmRecord, VmStatus};

use crate::api::HypervisorApi;
use crate::wire::VmSummary;
use crate::ExecutorError;

/// A VM found by name on the node.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ResolvedVm {
    pub vmid: VmId,
    pub name: VmName,
    pub status: VmStatus,
    pub max_memory_bytes: Option<u64>,
    pub cpus: Option<u32>,
}

impl ResolvedVm {
    pub(crate) fn from_summary(summary: &VmSummary) -> Self {
        Self {
            vmid: VmId::new(summary.vmid),
            name: VmName::new(summary.display_name()),
            status: VmStatus::from_hypervisor(&summary.status),
            max_memory_bytes: summary.maxmem,
            cpus: summary.cpus,
        }
    }

    /// A record of this VM as observed now, with no IP or log.
    #[must_use]
    pub fn into_record(self) -> VmRecord {
        let mut record = VmRecord::new(self.vmid, self.name, self.status);
        record.allocated_memory_bytes = self.max_memory_bytes;
        record.allocated_cpu_count = self.cpus;
        record
    }
}

/// List the node's VMs and find `name`.
///
/// # Errors
/// Returns [`ExecutorError::VmNotFound`] listing every name on the node if
/// no VM matches, or any error from the list call.
pub async fn resolve_vm(
    api: &HypervisorApi,
    session: &AuthSession,
    name: &str,
) -> Result<ResolvedVm, ExecutorError> {
    let vms = api.list_vms(session).await?;
    find_by_name(&vms, name, api.node())
}

/// Find `name` in an already fetched VM list.
///
/// Names are compared exactly. With duplicate names the first listed VM wins.
///
/// # Errors
/// Returns [`ExecutorError::VmNotFound`] with the sorted names on the node.
pub fn find_by_name(vms: &[VmSummary], name: &str, node: &str) -> Result<ResolvedVm, ExecutorError> {
    if let Some(found) = vms.iter().find(|vm| vm.name.as_deref() == Some(name)) {
        return Ok(ResolvedVm::from_summary(found));
    }
    let mut available: Vec<String> = vms.iter().map(VmSummary::display_name).collect();
    available.sort();
    Err(ExecutorError::VmNotFound {
        name: name.to_owned(),
        node: node.to_owned(),
        available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> Vec<VmSummary> {
        let mut beta = VmSummary::new(102, "beta", "stopped");
        beta.maxmem = Some(2_147_483_648);
        beta.cpus = Some(2);
        vec![VmSummary::new(101, "alpha", "running"), beta, VmSummary::new(103, "gamma", "paused")]
    }

    #[test]
    fn finds_exact_name() {
        let vm = find_by_name(&fleet(), "beta", "pve").expect("beta exists");
        assert_eq!(vm.vmid, VmId::new(102));
        assert_eq!(vm.status, VmStatus::Stopped);
        assert_eq!(vm.max_memory_bytes, Some(2_147_483_648));
    }

    #[test]
    fn unmapped_status_is_unknown() {
        let vm = find_by_name(&fleet(), "gamma", "pve").expect("gamma exists");
        assert_eq!(vm.status, VmStatus::Unknown);
    }

    #[test]
    fn match_is_case_sensitive() {
        assert!(find_by_name(&fleet(), "Alpha", "pve").is_err());
    }

    #[test]
    fn not_found_lists_available_names_sorted() {
        let mut vms = fleet();
        vms.reverse();
        match find_by_name(&vms, "delta", "pve") {
            Err(err @ ExecutorError::VmNotFound { .. }) => {
                let ExecutorError::VmNotFound { available, node, .. } = &err else {
                    unreachable!()
                };
                assert_eq!(available, &["alpha", "beta", "gamma"]);
                assert_eq!(node, "pve");
                let message = err.to_string();
                assert!(message.contains("delta") && message.contains("alpha, beta, gamma"), "{message}");
            }
            other => panic!("expected VmNotFound, got {other:?}"),
        }
    }

    #[test]
    fn into_record_carries_allocation() {
        let record = find_by_name(&fleet(), "beta", "pve").expect("beta").into_record();
        assert_eq!(record.allocated_cpu_count, Some(2));
        assert_eq!(record.ip, None);
        assert!(record.last_operation_log.is_empty());
    }
}
