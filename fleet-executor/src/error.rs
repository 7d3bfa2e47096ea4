//! Error types for the executor crate.

use fleet_core::CoreError;

/// Errors that can occur during fleet lifecycle operations.
///
/// None of these are retried inside the engine; retry policy belongs to the
/// caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// No usable credentials or connection settings were supplied.
    #[error("configuration error: {0}")]
    Config(String),

    /// The ticket endpoint rejected the credentials.
    #[error("authentication failed for {principal} (HTTP {status}): {body}")]
    AuthFailed {
        principal: String,
        status: u16,
        body: String,
    },

    /// No VM with the requested name exists on the node.
    #[error("VM '{name}' not found on node {node}; available: [{}]", .available.join(", "))]
    VmNotFound {
        name: String,
        node: String,
        available: Vec<String>,
    },

    /// A hypervisor task finished with a non-`OK` exit status.
    #[error("task {upid} failed: {exit_status}")]
    TaskFailed { upid: String, exit_status: String },

    /// A hypervisor task did not reach a terminal state before the deadline.
    #[error("task {upid} did not finish within {waited_secs}s ({polls} polls)")]
    TaskTimedOut {
        upid: String,
        waited_secs: u64,
        polls: u32,
    },

    /// The guest agent never reported a routable IPv4 address.
    #[error("VM '{name}' reported no IPv4 address within {waited_secs}s ({polls} polls)")]
    IpDiscoveryTimeout {
        name: String,
        waited_secs: u64,
        polls: u32,
    },

    /// The hypervisor answered a request with a non-2xx status.
    #[error("HTTP {status} from {method} {path}: {body}")]
    HttpStatus {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    /// A response body did not match the expected shape for its endpoint.
    #[error("unexpected response from {endpoint}: {reason}")]
    UnexpectedResponse { endpoint: String, reason: String },

    /// The request never produced an HTTP response (connect, DNS, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller's request was rejected before any hypervisor call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The resource store failed to read or write a version.
    #[error("resource store error: {0}")]
    Store(String),

    /// No version exists for the requested resource.
    #[error("resource {kind}/{name} not found")]
    ResourceNotFound { kind: String, name: String },

    /// A domain value failed validation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON encoding or decoding failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
