//! VM lifecycle orchestration against a Proxmox-style hypervisor API.
//!
//! Resolves sessions, drives create/start/stop/delete/reconfigure operations
//! through asynchronous hypervisor tasks, discovers guest addresses, and
//! records every outcome as a versioned resource other automation can read.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod api;
pub mod auth;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod locks;
pub mod oplog;
pub mod poller;
pub mod resolver;
pub mod store;
pub mod transport;
pub mod wire;

pub use api::HypervisorApi;
pub use auth::{
    AuthReport, AuthSessionManager, ResolveOptions, ResolvedSession, SessionCache,
    StoreSessionCache,
};
pub use config::{ConnectionParams, DeletePolicy, EngineConfig, FleetConfig};
pub use controller::{CreateVmRequest, StartOptions, SyncReport, VmLifecycleController};
pub use discovery::{discover_ip, first_routable_ipv4, Discovery};
pub use error::ExecutorError;
pub use locks::VmLocks;
pub use oplog::{Operation, OperationLog, OperationOutcome, OperationReport};
pub use poller::TaskPoller;
pub use resolver::{find_by_name, resolve_vm, ResolvedVm};
pub use reqwest::Method;
pub use store::{FsResourceStore, MemoryResourceStore, ResourceStore, WriteOptions};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, HypervisorTransport};
