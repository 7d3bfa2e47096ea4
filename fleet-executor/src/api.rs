//! Typed calls against the hypervisor REST API.
//!
//! Wraps a [`HypervisorTransport`] with one method per endpoint the engine
//! uses. Reads authenticate with the session cookie; mutations also send the
//! anti-CSRF header.

use std::fmt;
use std::sync::Arc;

use fleet_core::{AuthSession, TaskHandle, VmId};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::transport::{ApiRequest, ApiResponse, HypervisorTransport};
use crate::wire::{self, GuestAgentResult, GuestInterface, NodeStatus, TaskStatus, TicketData, VmSummary};
use crate::ExecutorError;

/// Cookie carrying the session ticket.
pub const AUTH_COOKIE: &str = "PVEAuthCookie";

/// Header carrying the anti-CSRF token on mutating requests.
pub const CSRF_HEADER: &str = "CSRFPreventionToken";

/// Endpoint-level client for one hypervisor node.
#[derive(Clone)]
pub struct HypervisorApi {
    transport: Arc<dyn HypervisorTransport>,
    node: String,
}

impl fmt::Debug for HypervisorApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HypervisorApi").field("node", &self.node).finish_non_exhaustive()
    }
}

impl HypervisorApi {
    /// Create a client for `node` over `transport`.
    pub fn new(transport: Arc<dyn HypervisorTransport>, node: impl Into<String>) -> Self {
        Self {
            transport,
            node: node.into(),
        }
    }

    /// The node this client manages.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Exchange username and password for a session.
    ///
    /// # Errors
    /// Returns [`ExecutorError::AuthFailed`] with the response body verbatim
    /// on a non-2xx status.
    pub async fn create_ticket(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthSession, ExecutorError> {
        const PATH: &str = "/access/ticket";
        let request = ApiRequest::new(Method::POST, PATH)
            .json(json!({ "username": username, "password": password }));
        let resp = self.transport.request(request).await?;
        if !resp.is_success() {
            return Err(ExecutorError::AuthFailed {
                principal: username.to_owned(),
                status: resp.status,
                body: resp.body,
            });
        }
        let ticket: TicketData = wire::decode(PATH, &resp.body)?;
        Ok(AuthSession::new(ticket.ticket, ticket.csrf_token, ticket.username))
    }

    /// List every VM on the node.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] on a non-2xx status, or
    /// [`ExecutorError::UnexpectedResponse`] if the body does not parse.
    pub async fn list_vms(&self, session: &AuthSession) -> Result<Vec<VmSummary>, ExecutorError> {
        self.get(session, &format!("/nodes/{}/qemu", self.node)).await
    }

    /// Ask the cluster for the next free VM id.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] or [`ExecutorError::UnexpectedResponse`].
    pub async fn next_vmid(&self, session: &AuthSession) -> Result<VmId, ExecutorError> {
        let resp = self.send(session, Method::GET, "/cluster/nextid", None).await?;
        wire::parse_next_vmid(&resp.body).map(VmId::new)
    }

    /// Submit a VM creation task.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] or [`ExecutorError::UnexpectedResponse`].
    pub async fn create_vm(
        &self,
        session: &AuthSession,
        params: Map<String, Value>,
    ) -> Result<TaskHandle, ExecutorError> {
        let path = format!("/nodes/{}/qemu", self.node);
        self.submit(session, Method::POST, &path, Some(Value::Object(params))).await
    }

    /// Submit a start task.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] or [`ExecutorError::UnexpectedResponse`].
    pub async fn start_vm(&self, session: &AuthSession, vmid: VmId) -> Result<TaskHandle, ExecutorError> {
        let path = format!("/nodes/{}/qemu/{vmid}/status/start", self.node);
        self.submit(session, Method::POST, &path, None).await
    }

    /// Submit a stop task.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] or [`ExecutorError::UnexpectedResponse`].
    pub async fn stop_vm(&self, session: &AuthSession, vmid: VmId) -> Result<TaskHandle, ExecutorError> {
        let path = format!("/nodes/{}/qemu/{vmid}/status/stop", self.node);
        self.submit(session, Method::POST, &path, None).await
    }

    /// Submit a destroy task.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] or [`ExecutorError::UnexpectedResponse`].
    pub async fn delete_vm(&self, session: &AuthSession, vmid: VmId) -> Result<TaskHandle, ExecutorError> {
        let path = format!("/nodes/{}/qemu/{vmid}", self.node);
        self.submit(session, Method::DELETE, &path, None).await
    }

    /// Apply config keys synchronously.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] on a non-2xx status.
    pub async fn update_config(
        &self,
        session: &AuthSession,
        vmid: VmId,
        config: Map<String, Value>,
    ) -> Result<(), ExecutorError> {
        let path = format!("/nodes/{}/qemu/{vmid}/config", self.node);
        self.send(session, Method::PUT, &path, Some(Value::Object(config)))
            .await
            .map(|_| ())
    }

    /// Query the status of a task.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] or [`ExecutorError::UnexpectedResponse`].
    pub async fn task_status(
        &self,
        session: &AuthSession,
        task: &TaskHandle,
    ) -> Result<TaskStatus, ExecutorError> {
        self.get(session, &format!("/nodes/{}/tasks/{}/status", task.node, task.upid))
            .await
    }

    /// Ask the guest agent for the VM's network interfaces.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] while the agent is not running,
    /// or [`ExecutorError::UnexpectedResponse`].
    pub async fn guest_interfaces(
        &self,
        session: &AuthSession,
        vmid: VmId,
    ) -> Result<Vec<GuestInterface>, ExecutorError> {
        let path = format!("/nodes/{}/qemu/{vmid}/agent/network-get-interfaces", self.node);
        let agent: GuestAgentResult = self.get(session, &path).await?;
        Ok(agent.result)
    }

    /// Read node status.
    ///
    /// # Errors
    /// Returns [`ExecutorError::HttpStatus`] or [`ExecutorError::UnexpectedResponse`].
    pub async fn node_status(&self, session: &AuthSession) -> Result<NodeStatus, ExecutorError> {
        self.get(session, &format!("/nodes/{}/status", self.node)).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        session: &AuthSession,
        path: &str,
    ) -> Result<T, ExecutorError> {
        let resp = self.send(session, Method::GET, path, None).await?;
        wire::decode(path, &resp.body)
    }

    async fn submit(
        &self,
        session: &AuthSession,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<TaskHandle, ExecutorError> {
        let resp = self.send(session, method, path, body).await?;
        let upid: String = wire::decode(path, &resp.body)?;
        TaskHandle::parse(&upid).map_err(|e| ExecutorError::UnexpectedResponse {
            endpoint: path.to_owned(),
            reason: e.to_string(),
        })
    }

    async fn send(
        &self,
        session: &AuthSession,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, ExecutorError> {
        let mut request = ApiRequest::new(method.clone(), path)
            .header("Cookie", format!("{AUTH_COOKIE}={}", session.ticket));
        if method != Method::GET {
            request = request.header(CSRF_HEADER, session.csrf_token.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = self.transport.request(request).await?;
        if !resp.is_success() {
            return Err(ExecutorError::HttpStatus {
                method: method.to_string(),
                path: path.to_owned(),
                status: resp.status,
                body: resp.body,
            });
        }
        Ok(resp)
    }
}
