//! Fuzz target: guest agent interface lists.
//!
//! Whatever the agent reports, the selected address must be a non-loopback
//! IPv4 address taken from a non-`lo` interface.

#![no_main]

use fleet_executor::{first_routable_ipv4, wire::GuestAgentResult};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(agent) = fleet_executor::wire::decode::<GuestAgentResult>("agent", body) else {
        return;
    };
    if let Some(ip) = first_routable_ipv4(&agent.result) {
        assert!(!ip.is_loopback());
        assert!(agent
            .result
            .iter()
            .filter(|iface| iface.name != "lo")
            .any(|iface| iface.ip_addresses.iter().any(|a| a.address.parse::<std::net::Ipv4Addr>().ok() == Some(ip))));
    }
});
