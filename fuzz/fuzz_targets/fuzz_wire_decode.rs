//! Fuzz target: hypervisor response envelopes.
//!
//! Every decoder the engine applies to upstream bodies must return an error,
//! not panic, on arbitrary input.

#![no_main]

use fleet_executor::wire::{self, NodeStatus, TaskStatus, TicketData, VmSummary};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };
    let _ = wire::decode::<TicketData>("/access/ticket", body);
    let _ = wire::decode::<Vec<VmSummary>>("/nodes/pve/qemu", body);
    let _ = wire::decode::<TaskStatus>("/nodes/pve/tasks/status", body);
    let _ = wire::decode::<NodeStatus>("/nodes/pve/status", body);
    let _ = wire::parse_next_vmid(body);
});
