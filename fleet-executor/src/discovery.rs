//! Guest IPv4 discovery through the guest agent.
//!
//! Agent errors are expected while a guest boots, so they are recorded and
//! retried until the window closes rather than propagated.

use std::net::Ipv4Addr;
use std::time::Duration;

use fleet_core::{AuthSession, VmId};
use tokio::time::Instant;

use crate::api::HypervisorApi;
use crate::wire::{GuestInterface, LOOPBACK_INTERFACE};
use crate::ExecutorError;

/// Lower bound on the delay between agent queries.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of one discovery window.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Discovery {
    /// First routable IPv4 address, if one was reported in time.
    pub ip: Option<Ipv4Addr>,
    /// Agent queries issued.
    pub polls: u32,
    /// Last agent error seen, for the operation log.
    pub last_error: Option<String>,
}

/// Poll the guest agent of `vmid` until it reports a routable IPv4 address
/// or `wait` elapses. At least one query is always made, and a query still
/// in flight when the window closes is abandoned.
///
/// A `wait` too large to represent as a deadline polls without one.
pub async fn discover_ip(
    api: &HypervisorApi,
    session: &AuthSession,
    vmid: VmId,
    wait: Duration,
    interval: Duration,
) -> Discovery {
    let interval = interval.max(MIN_POLL_INTERVAL);
    let deadline = Instant::now().checked_add(wait);
    let mut polls = 0;
    let mut last_error = None;

    loop {
        polls += 1;
        let query = api.guest_interfaces(session, vmid);
        let answer = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, query).await.unwrap_or_else(|_| {
                Err(ExecutorError::Transport(
                    "guest agent query outlasted the discovery window".to_owned(),
                ))
            }),
            None => query.await,
        };
        match answer {
            Ok(interfaces) => {
                if let Some(ip) = first_routable_ipv4(&interfaces) {
                    tracing::debug!(%vmid, %ip, polls, "guest reported IPv4 address");
                    return Discovery {
                        ip: Some(ip),
                        polls,
                        last_error,
                    };
                }
            }
            Err(e) => {
                tracing::trace!(%vmid, error = %e, "guest agent not ready");
                last_error = Some(e.to_string());
            }
        }

        if deadline.is_some_and(|deadline| window_closes_before_next_poll(deadline, interval)) {
            tracing::debug!(%vmid, polls, "no guest IPv4 address within window");
            return Discovery {
                ip: None,
                polls,
                last_error,
            };
        }
        tokio::time::sleep(interval).await;
    }
}

/// Whether waiting `interval` more would end past `deadline`.
pub(crate) fn window_closes_before_next_poll(deadline: Instant, interval: Duration) -> bool {
    Instant::now()
        .checked_add(interval)
        .is_none_or(|next| next > deadline)
}

/// First IPv4 address on a non-loopback interface, in reported order.
///
/// Entries whose address does not parse, and loopback addresses on any
/// interface, are skipped.
#[must_use]
pub fn first_routable_ipv4(interfaces: &[GuestInterface]) -> Option<Ipv4Addr> {
    interfaces
        .iter()
        .filter(|iface| iface.name != LOOPBACK_INTERFACE)
        .flat_map(|iface| &iface.ip_addresses)
        .filter(|addr| addr.address_type == "ipv4")
        .filter_map(|addr| addr.address.parse::<Ipv4Addr>().ok())
        .find(|ip| !ip.is_loopback())
}
