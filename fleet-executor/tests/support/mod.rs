//! Scripted in-memory hypervisor for controller tests.
//!
//! Implements [`HypervisorTransport`] by routing each request against a small
//! model of one node: a VM table, task table, and per-VM guest-agent script.
//! Every request is recorded for later assertions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fleet_executor::{
    ApiRequest, ApiResponse, ConnectionParams, DeletePolicy, ExecutorError, FleetConfig,
    HypervisorTransport, MemoryResourceStore, Method, VmLifecycleController,
};
use serde_json::{json, Value};

pub const NODE: &str = "pve";

/// One request as the hypervisor saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub cookie: Option<String>,
    pub csrf: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
struct MockVm {
    vmid: u32,
    name: String,
    status: String,
    maxmem: u64,
    cpus: u32,
}

#[derive(Debug, Clone)]
struct MockTask {
    running_polls: u32,
    exit_status: String,
}

/// Guest agent behaviour for one VM.
#[derive(Debug, Clone)]
pub struct AgentScript {
    /// Queries answered with only the loopback interface before the address appears.
    pub polls_before_ip: u32,
    /// Address reported once `polls_before_ip` is exhausted; `None` never reports one.
    pub ip: Option<String>,
}

impl AgentScript {
    pub fn after(polls_before_ip: u32, ip: &str) -> Self {
        Self {
            polls_before_ip,
            ip: Some(ip.to_owned()),
        }
    }

    pub fn never() -> Self {
        Self {
            polls_before_ip: 0,
            ip: None,
        }
    }
}

#[derive(Default)]
struct State {
    vms: Vec<MockVm>,
    next_vmid: u32,
    tasks: HashMap<String, MockTask>,
    task_seq: u32,
    agents: HashMap<u32, AgentScript>,
    failures: Vec<(Method, String, u16, String)>,
    task_running_polls: u32,
    task_exit_status: Option<String>,
    calls: Vec<RecordedCall>,
}

/// In-memory hypervisor node.
#[derive(Default)]
pub struct MockHypervisor {
    state: Mutex<State>,
}

impl MockHypervisor {
    pub fn new() -> Arc<Self> {
        let mock = Self::default();
        mock.state().next_vmid = 200;
        Arc::new(mock)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("mock state lock")
    }

    /// Add a VM to the node.
    pub fn with_vm(self: Arc<Self>, vmid: u32, name: &str, status: &str) -> Arc<Self> {
        self.state().vms.push(MockVm {
            vmid,
            name: name.to_owned(),
            status: status.to_owned(),
            maxmem: 2 * 1024 * 1024 * 1024,
            cpus: 2,
        });
        self
    }

    /// Script the guest agent of `vmid`.
    pub fn with_agent(self: Arc<Self>, vmid: u32, script: AgentScript) -> Arc<Self> {
        self.state().agents.insert(vmid, script);
        self
    }

    /// Answer every request matching `method` and `path_suffix` with `status`.
    pub fn failing(self: Arc<Self>, method: Method, path_suffix: &str, status: u16, body: &str) -> Arc<Self> {
        self.state()
            .failures
            .push((method, path_suffix.to_owned(), status, body.to_owned()));
        self
    }

    /// Report each new task as running for `polls` queries before it stops.
    pub fn with_task_running_polls(self: Arc<Self>, polls: u32) -> Arc<Self> {
        self.state().task_running_polls = polls;
        self
    }

    /// Exit status of every new task.
    pub fn with_task_exit(self: Arc<Self>, exit_status: &str) -> Arc<Self> {
        self.state().task_exit_status = Some(exit_status.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// Number of requests with `method` whose path ends with `suffix`.
    pub fn count(&self, method: &Method, suffix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| &c.method == method && c.path.ends_with(suffix))
            .count()
    }

    /// Number of non-GET requests other than the ticket exchange.
    pub fn mutation_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.method != Method::GET && c.path != "/access/ticket")
            .count()
    }

    pub fn ticket_exchanges(&self) -> usize {
        self.count(&Method::POST, "/access/ticket")
    }

    pub fn task_polls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.path.contains("/tasks/"))
            .count()
    }

    pub fn agent_polls(&self) -> usize {
        self.count(&Method::GET, "/agent/network-get-interfaces")
    }

    pub fn vm_status(&self, name: &str) -> Option<String> {
        self.state()
            .vms
            .iter()
            .find(|vm| vm.name == name)
            .map(|vm| vm.status.clone())
    }

    fn route(&self, request: &ApiRequest) -> (u16, Value) {
        let mut state = self.state();
        let path = request.path.as_str();
        let method = &request.method;

        if let Some((_, _, status, body)) = state
            .failures
            .iter()
            .find(|(m, suffix, _, _)| m == method && path.ends_with(suffix.as_str()))
        {
            return (*status, Value::String(body.clone()));
        }

        if path == "/access/ticket" {
            return (
                200,
                json!({ "data": {
                    "ticket": "PVE:root@pam:MOCK",
                    "CSRFPreventionToken": "MOCK:csrf",
                    "username": "root@pam",
                }}),
            );
        }

        if !request
            .header_value("Cookie")
            .is_some_and(|c| c.starts_with("PVEAuthCookie="))
        {
            return (401, json!("no ticket"));
        }
        if *method != Method::GET && request.header_value("CSRFPreventionToken").is_none() {
            return (401, json!("permission denied - invalid csrf token"));
        }

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match (method.as_str(), segments.as_slice()) {
            ("GET", ["cluster", "nextid"]) => {
                let next = state.next_vmid;
                (200, json!({ "data": next.to_string() }))
            }
            ("GET", ["nodes", _, "status"]) => {
                (200, json!({ "data": { "uptime": 86_400, "pveversion": "pve-manager/8.2.2" } }))
            }
            ("GET", ["nodes", _, "qemu"]) => {
                let data: Vec<Value> = state
                    .vms
                    .iter()
                    .map(|vm| {
                        json!({
                            "vmid": vm.vmid,
                            "name": vm.name,
                            "status": vm.status,
                            "maxmem": vm.maxmem,
                            "cpus": vm.cpus,
                        })
                    })
                    .collect();
                (200, json!({ "data": data }))
            }
            ("POST", ["nodes", _, "qemu"]) => {
                let body = request.body.clone().unwrap_or(Value::Null);
                let vmid = body["vmid"].as_u64().and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
                let name = body["name"].as_str().unwrap_or_default().to_owned();
                let memory = body["memory"].as_u64().unwrap_or(0);
                let cpus = body["cores"].as_u64().and_then(|v| u32::try_from(v).ok()).unwrap_or(1);
                state.vms.push(MockVm {
                    vmid,
                    name,
                    status: "stopped".to_owned(),
                    maxmem: memory * 1024 * 1024,
                    cpus,
                });
                state.next_vmid = vmid + 1;
                Self::new_task(&mut state, "qmcreate", vmid)
            }
            ("POST", ["nodes", _, "qemu", vmid, "status", action]) => {
                let vmid: u32 = vmid.parse().unwrap_or(0);
                let (kind, next) = match *action {
                    "start" => ("qmstart", "running"),
                    "stop" => ("qmstop", "stopped"),
                    _ => return (501, json!("unsupported action")),
                };
                match state.vms.iter_mut().find(|vm| vm.vmid == vmid) {
                    Some(vm) => vm.status = next.to_owned(),
                    None => return (500, json!(format!("VM {vmid} does not exist"))),
                }
                Self::new_task(&mut state, kind, vmid)
            }
            ("DELETE", ["nodes", _, "qemu", vmid]) => {
                let vmid: u32 = vmid.parse().unwrap_or(0);
                state.vms.retain(|vm| vm.vmid != vmid);
                Self::new_task(&mut state, "qmdestroy", vmid)
            }
            ("PUT", ["nodes", _, "qemu", _, "config"]) => (200, json!({ "data": null })),
            ("GET", ["nodes", _, "tasks", upid, "status"]) => {
                let Some(task) = state.tasks.get_mut(*upid) else {
                    return (404, json!("no such task"));
                };
                if task.running_polls > 0 {
                    task.running_polls -= 1;
                    (200, json!({ "data": { "status": "running" } }))
                } else {
                    (200, json!({ "data": { "status": "stopped", "exitstatus": task.exit_status } }))
                }
            }
            ("GET", ["nodes", _, "qemu", vmid, "agent", "network-get-interfaces"]) => {
                let vmid: u32 = vmid.parse().unwrap_or(0);
                let running = state.vms.iter().any(|vm| vm.vmid == vmid && vm.status == "running");
                if !running {
                    return (500, json!("VM is not running"));
                }
                let Some(agent) = state.agents.get_mut(&vmid) else {
                    return (500, json!("QEMU guest agent is not running"));
                };
                let mut interfaces = vec![json!({
                    "name": "lo",
                    "ip-addresses": [{ "ip-address-type": "ipv4", "ip-address": "127.0.0.1", "prefix": 8 }],
                })];
                if agent.polls_before_ip > 0 {
                    agent.polls_before_ip -= 1;
                } else if let Some(ip) = &agent.ip {
                    interfaces.push(json!({
                        "name": "eth0",
                        "ip-addresses": [
                            { "ip-address-type": "ipv6", "ip-address": "fe80::1", "prefix": 64 },
                            { "ip-address-type": "ipv4", "ip-address": ip, "prefix": 24 },
                        ],
                    }));
                }
                (200, json!({ "data": { "result": interfaces } }))
            }
            _ => (501, json!(format!("unrouted {method} {path}"))),
        }
    }

    fn new_task(state: &mut State, kind: &str, vmid: u32) -> (u16, Value) {
        state.task_seq += 1;
        let upid = format!(
            "UPID:{NODE}:{:08X}:00000000:65F00000:{kind}:{vmid}:root@pam:",
            state.task_seq
        );
        let task = MockTask {
            running_polls: state.task_running_polls,
            exit_status: state.task_exit_status.clone().unwrap_or_else(|| "OK".to_owned()),
        };
        state.tasks.insert(upid.clone(), task);
        (200, json!({ "data": upid }))
    }
}

#[async_trait]
impl HypervisorTransport for MockHypervisor {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ExecutorError> {
        let (status, body) = self.route(&request);
        self.state().calls.push(RecordedCall {
            method: request.method.clone(),
            path: request.path.clone(),
            cookie: request.header_value("Cookie").map(str::to_owned),
            csrf: request.header_value("CSRFPreventionToken").map(str::to_owned),
            body: request.body.clone(),
        });
        let body = match body {
            Value::String(text) => text,
            other => other.to_string(),
        };
        Ok(ApiResponse::new(status, body))
    }
}

/// Password-authenticated config for the mock node.
pub fn config() -> FleetConfig {
    FleetConfig::new(ConnectionParams::new("https://mock:8006/api2/json", NODE).with_password("root@pam", "secret"))
}

pub fn controller(mock: &Arc<MockHypervisor>, store: &MemoryResourceStore) -> VmLifecycleController {
    controller_with(mock, store, config())
}

pub fn controller_with_policy(
    mock: &Arc<MockHypervisor>,
    store: &MemoryResourceStore,
    policy: DeletePolicy,
) -> VmLifecycleController {
    let mut config = config();
    config.engine.delete_policy = policy;
    controller_with(mock, store, config)
}

pub fn controller_with(
    mock: &Arc<MockHypervisor>,
    store: &MemoryResourceStore,
    config: FleetConfig,
) -> VmLifecycleController {
    VmLifecycleController::new(mock.clone(), Arc::new(store.clone()), config)
}
