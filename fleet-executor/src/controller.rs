//! VM lifecycle state machine.
//!
//! `Nonexistent → Stopped ⇄ Running → Deleted`. Every operation runs
//! session → resolve → mutate → poll → discover → persist strictly in that
//! order and either writes exactly one `vm` resource version or fails without
//! writing one. Operations on the same VM name are serialized by [`VmLocks`].

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    validate_segment, AuthSession, ResourceKind, ResourceVersion, TaskOutcome, VersionHandle, VmId,
    VmName, VmRecord, VmStatus,
};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::api::HypervisorApi;
use crate::auth::{AuthReport, AuthSessionManager, ResolveOptions, StoreSessionCache};
use crate::config::{DeletePolicy, FleetConfig};
use crate::discovery::discover_ip;
use crate::locks::VmLocks;
use crate::oplog::{Operation, OperationLog, OperationOutcome, OperationReport};
use crate::poller::TaskPoller;
use crate::resolver::{find_by_name, resolve_vm, ResolvedVm};
use crate::store::{FsResourceStore, ResourceStore, WriteOptions};
use crate::transport::{HttpTransport, HypervisorTransport};
use crate::wire::NodeStatus;
use crate::ExecutorError;

/// Boot order used when a VM has no disk and must network-boot.
pub const BOOT_ORDER_NETWORK: &str = "order=net0";

/// Boot order used when a VM has a disk: disk first, network as fallback.
pub const BOOT_ORDER_DISK_FIRST: &str = "order=scsi0;net0";

const MIB: u64 = 1024 * 1024;

/// Parameters of a new VM.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct CreateVmRequest {
    pub name: String,
    pub cores: u32,
    pub memory_mib: u64,
    /// Disk size in GiB; `0` creates a diskless, network-booting VM.
    pub disk_gib: u32,
    /// Storage the disk is allocated on.
    pub storage: String,
    /// Bridge the first NIC is attached to.
    pub bridge: String,
    /// Additional raw config keys, applied last.
    pub extra: IndexMap<String, Value>,
}

impl CreateVmRequest {
    /// One core, 1 GiB of memory, no disk, `local-lvm` storage, `vmbr0` bridge.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cores: 1,
            memory_mib: 1024,
            disk_gib: 0,
            storage: "local-lvm".to_owned(),
            bridge: "vmbr0".to_owned(),
            extra: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn cores(mut self, cores: u32) -> Self {
        self.cores = cores;
        self
    }

    #[must_use]
    pub fn memory_mib(mut self, memory_mib: u64) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    #[must_use]
    pub fn disk(mut self, storage: impl Into<String>, disk_gib: u32) -> Self {
        self.storage = storage.into();
        self.disk_gib = disk_gib;
        self
    }

    #[must_use]
    pub fn bridge(mut self, bridge: impl Into<String>) -> Self {
        self.bridge = bridge.into();
        self
    }

    /// Boot order implied by the disk size.
    #[must_use]
    pub fn boot_order(&self) -> &'static str {
        if self.disk_gib == 0 {
            BOOT_ORDER_NETWORK
        } else {
            BOOT_ORDER_DISK_FIRST
        }
    }
}

/// Request body for `POST /nodes/{node}/qemu`.
#[must_use]
pub fn build_create_body(vmid: VmId, request: &CreateVmRequest) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("vmid".to_owned(), json!(vmid.get()));
    body.insert("name".to_owned(), json!(request.name));
    body.insert("cores".to_owned(), json!(request.cores));
    body.insert("memory".to_owned(), json!(request.memory_mib));
    body.insert("net0".to_owned(), json!(format!("virtio,bridge={}", request.bridge)));
    body.insert("agent".to_owned(), json!("1"));
    if request.disk_gib > 0 {
        body.insert("scsihw".to_owned(), json!("virtio-scsi-pci"));
        body.insert(
            "scsi0".to_owned(),
            json!(format!("{}:{}", request.storage, request.disk_gib)),
        );
    }
    body.insert("boot".to_owned(), json!(request.boot_order()));
    for (key, value) in &request.extra {
        body.insert(key.clone(), value.clone());
    }
    body
}

/// IP wait window for `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct StartOptions {
    pub wait: Duration,
    pub poll_interval: Duration,
}

impl StartOptions {
    #[must_use]
    pub fn new(wait: Duration, poll_interval: Duration) -> Self {
        Self { wait, poll_interval }
    }
}

/// Summary of a fleet-wide sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct SyncReport {
    /// One version per listed VM, in list order.
    pub versions: Vec<VersionHandle>,
    pub running: usize,
    pub with_ip: usize,
}

/// Drives VM lifecycle operations against one hypervisor node and records
/// each outcome in the resource store.
#[derive(Clone)]
pub struct VmLifecycleController {
    api: HypervisorApi,
    auth: AuthSessionManager,
    store: Arc<dyn ResourceStore>,
    locks: VmLocks,
    poller: TaskPoller,
    config: FleetConfig,
}

impl VmLifecycleController {
    /// Assemble a controller from its transport and store.
    ///
    /// Cached sessions live in the same store as VM records.
    pub fn new(
        transport: Arc<dyn HypervisorTransport>,
        store: Arc<dyn ResourceStore>,
        config: FleetConfig,
    ) -> Self {
        let api = HypervisorApi::new(transport, config.connection.node.clone());
        let cache = Arc::new(StoreSessionCache::new(Arc::clone(&store)));
        let auth = AuthSessionManager::new(api.clone(), cache, config.engine.session_ttl);
        let poller = TaskPoller::new(config.engine.task_poll_interval, config.engine.task_timeout);
        Self {
            api,
            auth,
            store,
            locks: VmLocks::new(),
            poller,
            config,
        }
    }

    /// Build a controller over HTTPS and the filesystem store described by `config`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Config`] if the HTTP client cannot be built.
    pub fn from_config(config: FleetConfig) -> Result<Self, ExecutorError> {
        let transport = HttpTransport::new(
            config.connection.endpoint.as_str(),
            config.connection.insecure_tls,
            config.engine.request_timeout,
        )?;
        let store = FsResourceStore::new(&config.engine.store_root, &config.engine.scope);
        tracing::info!(
            endpoint = %config.connection.endpoint,
            node = %config.connection.node,
            store = %store.base_dir().display(),
            "lifecycle controller configured"
        );
        Ok(Self::new(Arc::new(transport), Arc::new(store), config))
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// `start` wait window from the engine defaults.
    #[must_use]
    pub fn default_start_options(&self) -> StartOptions {
        StartOptions::new(
            self.config.engine.start_ip_wait,
            self.config.engine.start_ip_poll_interval,
        )
    }

    /// Mint a fresh session, bypassing the cache.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Config`] or [`ExecutorError::AuthFailed`].
    pub async fn authenticate(&self) -> Result<AuthReport, ExecutorError> {
        let resolved = self.auth.authenticate(&self.config.connection).await?;
        Ok(AuthReport::from(&resolved))
    }

    /// Create a VM with the next free id. The VM ends `Stopped`.
    ///
    /// Not idempotent: repeating the call creates another VM with the same name.
    ///
    /// # Errors
    /// Returns session, HTTP, and [`ExecutorError::TaskFailed`] errors.
    pub async fn create(&self, request: &CreateVmRequest) -> Result<OperationOutcome, ExecutorError> {
        validate_segment("vm name", &request.name)?;
        let _guard = self.locks.lock(&request.name).await;
        let mut log = OperationLog::new(Operation::Create, request.name.as_str());
        let session = self.session().await?;

        let vmid = self.api.next_vmid(&session).await?;
        log.push(format!("allocated vmid {vmid}"));

        let task = self
            .api
            .create_vm(&session, build_create_body(vmid, request))
            .await?;
        log.push(format!(
            "create task {task} submitted ({} cores, {} MiB, {} GiB disk, boot {})",
            request.cores,
            request.memory_mib,
            request.disk_gib,
            request.boot_order()
        ));
        let outcome = self.poller.wait_ok(&self.api, &session, &task).await?;
        log.push(format!("created after {} polls", outcome.poll_count));

        let mut record = VmRecord::new(vmid, VmName::new(request.name.as_str()), VmStatus::Stopped);
        record.allocated_memory_bytes = Some(request.memory_mib.saturating_mul(MIB));
        record.allocated_cpu_count = Some(request.cores);
        let mut report = OperationReport::new(Operation::Create, record, &log);
        report.boot_order = Some(request.boot_order().to_owned());
        report.tasks.push(outcome);
        self.persist(report).await
    }

    /// Ensure the VM is running and has reported a guest IPv4 address.
    ///
    /// A start is issued only when the VM is `Stopped`; the IP wait happens
    /// regardless.
    ///
    /// # Errors
    /// Returns [`ExecutorError::IpDiscoveryTimeout`] if no address appears
    /// within `options.wait`, plus session, resolution, HTTP, and task errors.
    pub async fn start(&self, name: &str, options: StartOptions) -> Result<OperationOutcome, ExecutorError> {
        validate_segment("vm name", name)?;
        let _guard = self.locks.lock(name).await;
        let mut log = OperationLog::new(Operation::Start, name);
        let session = self.session().await?;
        let vm = self.resolve(&session, name, &mut log).await?;

        let mut tasks = Vec::new();
        let start_issued = vm.status == VmStatus::Stopped;
        if start_issued {
            let task = self.api.start_vm(&session, vm.vmid).await?;
            log.push(format!("start task {task} submitted"));
            let outcome = self.poller.wait_ok(&self.api, &session, &task).await?;
            log.push(format!("started after {} polls", outcome.poll_count));
            tasks.push(outcome);
        } else {
            log.push(format!("already {}, not starting", vm.status));
        }

        let vmid = vm.vmid;
        let status = if start_issued { VmStatus::Running } else { vm.status };
        let discovery = discover_ip(&self.api, &session, vmid, options.wait, options.poll_interval).await;
        let Some(ip) = discovery.ip else {
            if let Some(last) = &discovery.last_error {
                log.warn(format!("last guest agent error: {last}"));
            }
            return Err(ExecutorError::IpDiscoveryTimeout {
                name: name.to_owned(),
                waited_secs: options.wait.as_secs(),
                polls: discovery.polls,
            });
        };
        log.push(format!("guest reported {ip} after {} polls", discovery.polls));

        let mut record = vm.into_record();
        record.status = status;
        record.ip = Some(ip);
        let mut report = OperationReport::new(Operation::Start, record, &log);
        report.start_issued = Some(start_issued);
        report.tasks = tasks;
        self.persist(report).await
    }

    /// Ensure the VM is stopped. No hypervisor call is made if it already is.
    ///
    /// # Errors
    /// Returns session, resolution, HTTP, and task errors.
    pub async fn stop(&self, name: &str) -> Result<OperationOutcome, ExecutorError> {
        validate_segment("vm name", name)?;
        let _guard = self.locks.lock(name).await;
        let mut log = OperationLog::new(Operation::Stop, name);
        let session = self.session().await?;
        let vm = self.resolve(&session, name, &mut log).await?;

        let mut tasks = Vec::new();
        let stop_issued = vm.status != VmStatus::Stopped;
        if stop_issued {
            let task = self.api.stop_vm(&session, vm.vmid).await?;
            log.push(format!("stop task {task} submitted"));
            let outcome = self.poller.wait_ok(&self.api, &session, &task).await?;
            log.push(format!("stopped after {} polls", outcome.poll_count));
            tasks.push(outcome);
        } else {
            log.push("already stopped");
        }

        let mut record = vm.into_record();
        record.status = VmStatus::Stopped;
        let mut report = OperationReport::new(Operation::Stop, record, &log);
        report.stop_issued = Some(stop_issued);
        report.tasks = tasks;
        self.persist(report).await
    }

    /// Destroy the VM, stopping it first on a best-effort basis.
    ///
    /// A failed stop is logged and the delete proceeds. A VM that no longer
    /// exists is an error under [`DeletePolicy::Strict`] and is recorded as
    /// already absent under [`DeletePolicy::Idempotent`].
    ///
    /// # Errors
    /// Returns session, resolution, HTTP, and task errors of the delete itself.
    pub async fn delete(&self, name: &str) -> Result<OperationOutcome, ExecutorError> {
        validate_segment("vm name", name)?;
        let _guard = self.locks.lock(name).await;
        let mut log = OperationLog::new(Operation::Delete, name);
        let session = self.session().await?;

        let vms = self.api.list_vms(&session).await?;
        let vm = match find_by_name(&vms, name, self.api.node()) {
            Ok(vm) => vm,
            Err(ExecutorError::VmNotFound { .. })
                if self.config.engine.delete_policy == DeletePolicy::Idempotent =>
            {
                return self.record_already_absent(name, log).await;
            }
            Err(e) => return Err(e),
        };
        log.push(format!("resolved {name} → {} ({})", vm.vmid, vm.status));

        let mut tasks = Vec::new();
        if vm.status != VmStatus::Stopped {
            match self.stop_best_effort(&session, vm.vmid).await {
                Ok(outcome) => {
                    log.push(format!("stopped before delete after {} polls", outcome.poll_count));
                    tasks.push(outcome);
                }
                Err(e) => log.warn(format!("stop before delete failed (may already be stopped): {e}")),
            }
        }

        let task = self.api.delete_vm(&session, vm.vmid).await?;
        log.push(format!("delete task {task} submitted"));
        let outcome = self.poller.wait_ok(&self.api, &session, &task).await?;
        log.push(format!("deleted after {} polls", outcome.poll_count));
        tasks.push(outcome);

        let mut record = vm.into_record();
        record.status = VmStatus::Deleted;
        let mut report = OperationReport::new(Operation::Delete, record, &log);
        report.tasks = tasks;
        self.persist(report).await
    }

    /// Set the raw boot order, e.g. `order=scsi0;net0`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidRequest`] for a blank order, plus
    /// session, resolution, and HTTP errors.
    pub async fn set_boot_order(&self, name: &str, order: &str) -> Result<OperationOutcome, ExecutorError> {
        validate_segment("vm name", name)?;
        if order.trim().is_empty() {
            return Err(ExecutorError::InvalidRequest("boot order must not be empty".to_owned()));
        }
        let _guard = self.locks.lock(name).await;
        let mut log = OperationLog::new(Operation::SetBootOrder, name);
        let session = self.session().await?;
        let vm = self.resolve(&session, name, &mut log).await?;

        let mut body = Map::new();
        body.insert("boot".to_owned(), json!(order));
        self.api.update_config(&session, vm.vmid, body).await?;
        log.push(format!("boot order set to {order}"));

        let mut report = OperationReport::new(Operation::SetBootOrder, vm.into_record(), &log);
        report.boot_order = Some(order.to_owned());
        self.persist(report).await
    }

    /// Apply arbitrary config keys in the given order.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidRequest`] for an empty map before any
    /// hypervisor call, plus session, resolution, and HTTP errors.
    pub async fn set_config(
        &self,
        name: &str,
        config: &IndexMap<String, Value>,
    ) -> Result<OperationOutcome, ExecutorError> {
        validate_segment("vm name", name)?;
        if config.is_empty() {
            return Err(ExecutorError::InvalidRequest(
                "config must contain at least one key".to_owned(),
            ));
        }
        let _guard = self.locks.lock(name).await;
        let mut log = OperationLog::new(Operation::SetConfig, name);
        let session = self.session().await?;
        let vm = self.resolve(&session, name, &mut log).await?;

        let keys: Vec<String> = config.keys().cloned().collect();
        let body: Map<String, Value> = config.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.api.update_config(&session, vm.vmid, body).await?;
        log.push(format!("applied config keys: {}", keys.join(", ")));

        let mut report = OperationReport::new(Operation::SetConfig, vm.into_record(), &log);
        report.config_keys = Some(keys);
        self.persist(report).await
    }

    /// Resolve a VM and record its current state. With `wait` set and the VM
    /// running, also look for its guest IP; a missing IP is recorded as `null`.
    ///
    /// # Errors
    /// Returns session, resolution, and HTTP errors.
    pub async fn lookup(&self, name: &str, wait: Option<Duration>) -> Result<OperationOutcome, ExecutorError> {
        validate_segment("vm name", name)?;
        let _guard = self.locks.lock(name).await;
        let mut log = OperationLog::new(Operation::Lookup, name);
        let session = self.session().await?;
        let vm = self.resolve(&session, name, &mut log).await?;
        let vmid = vm.vmid;
        let running = vm.status == VmStatus::Running;

        let mut record = vm.into_record();
        if let Some(wait) = wait.filter(|_| running) {
            record.ip = self.discover_logged(&session, vmid, wait, &mut log).await;
        }
        self.persist(OperationReport::new(Operation::Lookup, record, &log))
            .await
    }

    /// Record every VM on the node, one version each, in list order.
    ///
    /// Running VMs get a short IP discovery first; stopped ones do not.
    ///
    /// # Errors
    /// Returns session and HTTP errors from listing, or a store error.
    pub async fn sync(&self) -> Result<SyncReport, ExecutorError> {
        let session = self.session().await?;
        let vms = self.api.list_vms(&session).await?;
        tracing::info!(node = self.api.node(), count = vms.len(), "syncing fleet");

        let mut report = SyncReport {
            versions: Vec::with_capacity(vms.len()),
            running: 0,
            with_ip: 0,
        };
        for summary in &vms {
            let vm = ResolvedVm::from_summary(summary);
            let name = vm.name.as_str().to_owned();
            let _guard = self.locks.lock(&name).await;
            let mut log = OperationLog::new(Operation::Sync, name.as_str());
            log.push(format!("listed {name} → {} ({})", vm.vmid, vm.status));

            let vmid = vm.vmid;
            let running = vm.status == VmStatus::Running;
            let mut record = vm.into_record();
            if running {
                report.running += 1;
                record.ip = self
                    .discover_logged(&session, vmid, self.config.engine.sync_ip_wait, &mut log)
                    .await;
                if record.ip.is_some() {
                    report.with_ip += 1;
                }
            }
            let outcome = self
                .persist(OperationReport::new(Operation::Sync, record, &log))
                .await?;
            report.versions.push(outcome.version);
        }
        tracing::info!(
            versions = report.versions.len(),
            running = report.running,
            with_ip = report.with_ip,
            "sync complete"
        );
        Ok(report)
    }

    /// Query node status to check connectivity and credentials.
    ///
    /// # Errors
    /// Returns session and HTTP errors.
    pub async fn health_check(&self) -> Result<NodeStatus, ExecutorError> {
        let session = self.session().await?;
        self.api.node_status(&session).await
    }

    /// Latest stored version of a resource.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ResourceNotFound`] if nothing was written yet.
    pub async fn read_latest(&self, kind: &ResourceKind, name: &str) -> Result<ResourceVersion, ExecutorError> {
        self.store
            .read_latest(kind, name)
            .await?
            .ok_or_else(|| ExecutorError::ResourceNotFound {
                kind: kind.to_string(),
                name: name.to_owned(),
            })
    }

    /// Committed version numbers of a resource, ascending.
    ///
    /// # Errors
    /// Returns a store error.
    pub async fn list_versions(&self, kind: &ResourceKind, name: &str) -> Result<Vec<u64>, ExecutorError> {
        self.store.list_versions(kind, name).await
    }

    async fn session(&self) -> Result<AuthSession, ExecutorError> {
        self.auth
            .resolve(&self.config.connection, ResolveOptions::default())
            .await
            .map(|resolved| resolved.session)
    }

    async fn resolve(
        &self,
        session: &AuthSession,
        name: &str,
        log: &mut OperationLog,
    ) -> Result<ResolvedVm, ExecutorError> {
        let vm = resolve_vm(&self.api, session, name).await?;
        log.push(format!("resolved {name} → {} ({})", vm.vmid, vm.status));
        Ok(vm)
    }

    async fn stop_best_effort(
        &self,
        session: &AuthSession,
        vmid: VmId,
    ) -> Result<TaskOutcome, ExecutorError> {
        let task = self.api.stop_vm(session, vmid).await?;
        self.poller.wait_ok(&self.api, session, &task).await
    }

    async fn discover_logged(
        &self,
        session: &AuthSession,
        vmid: VmId,
        wait: Duration,
        log: &mut OperationLog,
    ) -> Option<Ipv4Addr> {
        let discovery = discover_ip(
            &self.api,
            session,
            vmid,
            wait,
            self.config.engine.sync_ip_poll_interval,
        )
        .await;
        match discovery.ip {
            Some(ip) => log.push(format!("guest reported {ip} after {} polls", discovery.polls)),
            None => log.warn(format!(
                "no guest IPv4 within {}s ({} polls)",
                wait.as_secs(),
                discovery.polls
            )),
        }
        discovery.ip
    }

    async fn record_already_absent(
        &self,
        name: &str,
        mut log: OperationLog,
    ) -> Result<OperationOutcome, ExecutorError> {
        let previous = self
            .store
            .read_latest(&ResourceKind::vm(), name)
            .await?
            .and_then(|v| v.attributes.get("vmid").and_then(Value::as_u64))
            .and_then(|id| u32::try_from(id).ok())
            .unwrap_or(0);
        log.warn(format!("{name} not found on node {}; recording as deleted", self.api.node()));

        let record = VmRecord::new(VmId::new(previous), VmName::new(name), VmStatus::Deleted);
        let mut report = OperationReport::new(Operation::Delete, record, &log);
        report.already_absent = Some(true);
        self.persist(report).await
    }

    async fn persist(&self, report: OperationReport) -> Result<OperationOutcome, ExecutorError> {
        let Value::Object(attributes) = serde_json::to_value(&report)? else {
            return Err(ExecutorError::Store("operation report did not serialize to an object".to_owned()));
        };
        let version = self
            .store
            .write(
                &ResourceKind::vm(),
                report.record.name.as_str(),
                attributes,
                WriteOptions::default(),
            )
            .await?;
        tracing::info!(
            vm = %report.record.name,
            operation = %report.operation,
            status = %report.record.status,
            %version,
            "operation recorded"
        );
        Ok(OperationOutcome::new(version, report))
    }
}
