//! Connection and engine configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use fleet_core::{CacheScope, AUTH_SESSION_TTL};
use serde::{Deserialize, Serialize};

use crate::ExecutorError;

/// Environment variable prefix for every setting read by [`FleetConfig::from_env`].
pub const ENV_PREFIX: &str = "FLEET_";

/// How to reach and authenticate against one hypervisor node.
#[derive(Clone, Default)]
#[non_exhaustive]
pub struct ConnectionParams {
    /// Base URL of the REST API, e.g. `https://pve.lan:8006/api2/json`.
    pub endpoint: String,
    /// Node name VMs are managed on.
    pub node: String,
    /// Login name including realm, e.g. `root@pam`.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Explicit session ticket; used verbatim together with `csrf_token`.
    pub ticket: Option<String>,
    pub csrf_token: Option<String>,
    /// Skip TLS certificate validation (self-signed cluster certificates).
    pub insecure_tls: bool,
}

impl ConnectionParams {
    /// Create params for `endpoint` and `node` with no credentials.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            node: node.into(),
            ..Self::default()
        }
    }

    /// Attach username/password credentials.
    #[must_use]
    pub fn with_password(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Attach an explicit ticket and anti-CSRF token.
    #[must_use]
    pub fn with_ticket(mut self, ticket: impl Into<String>, csrf_token: impl Into<String>) -> Self {
        self.ticket = Some(ticket.into());
        self.csrf_token = Some(csrf_token.into());
        self
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ConnectionParams")
            .field("endpoint", &self.endpoint)
            .field("node", &self.node)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("ticket", &redact(&self.ticket))
            .field("csrf_token", &redact(&self.csrf_token))
            .field("insecure_tls", &self.insecure_tls)
            .finish()
    }
}

/// What `delete` does when the named VM no longer exists on the hypervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum DeletePolicy {
    /// Fail with [`ExecutorError::VmNotFound`].
    #[default]
    Strict,
    /// Record the VM as deleted and succeed.
    Idempotent,
}

impl FromStr for DeletePolicy {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "idempotent" => Ok(Self::Idempotent),
            other => Err(ExecutorError::Config(format!(
                "unknown delete policy '{other}'; expected 'strict' or 'idempotent'"
            ))),
        }
    }
}

/// Timing, persistence, and policy settings for the lifecycle engine.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct EngineConfig {
    /// Maximum age at which a cached session is reused.
    pub session_ttl: Duration,
    /// Delay between task-status queries.
    pub task_poll_interval: Duration,
    /// Deadline for one task to finish. `None` waits indefinitely.
    pub task_timeout: Option<Duration>,
    /// IP wait window per running VM during `sync`.
    pub sync_ip_wait: Duration,
    pub sync_ip_poll_interval: Duration,
    /// Defaults for `start` when the caller does not specify a wait.
    pub start_ip_wait: Duration,
    pub start_ip_poll_interval: Duration,
    pub delete_policy: DeletePolicy,
    /// Root directory of the filesystem resource store.
    pub store_root: PathBuf,
    /// Scope under which sessions and VM records are stored.
    pub scope: CacheScope,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl: AUTH_SESSION_TTL,
            task_poll_interval: Duration::from_secs(1),
            task_timeout: Some(Duration::from_secs(600)),
            sync_ip_wait: Duration::from_secs(5),
            sync_ip_poll_interval: Duration::from_secs(1),
            start_ip_wait: Duration::from_secs(120),
            start_ip_poll_interval: Duration::from_secs(5),
            delete_policy: DeletePolicy::Strict,
            store_root: PathBuf::from("/var/lib/fleet/resources"),
            scope: CacheScope::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Complete configuration: where the hypervisor is and how the engine behaves.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct FleetConfig {
    pub connection: ConnectionParams,
    pub engine: EngineConfig,
}

impl FleetConfig {
    /// Create a configuration with default engine settings.
    #[must_use]
    pub fn new(connection: ConnectionParams) -> Self {
        Self {
            connection,
            engine: EngineConfig::default(),
        }
    }

    /// Read configuration from `FLEET_*` environment variables.
    ///
    /// # Errors
    /// See [`FleetConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ExecutorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which receives full variable
    /// names such as `FLEET_ENDPOINT`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Config`] if `FLEET_ENDPOINT` or `FLEET_NODE` is
    /// missing, or a numeric, boolean, or policy value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ExecutorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };
        let require = |name: &str| {
            get(name).ok_or_else(|| ExecutorError::Config(format!("{ENV_PREFIX}{name} is not set")))
        };

        let mut connection = ConnectionParams::new(require("ENDPOINT")?, require("NODE")?);
        connection.username = get("USERNAME");
        connection.password = get("PASSWORD");
        connection.ticket = get("TICKET");
        connection.csrf_token = get("CSRF_TOKEN");
        if let Some(raw) = get("INSECURE_TLS") {
            connection.insecure_tls = parse_bool("INSECURE_TLS", &raw)?;
        }

        let mut engine = EngineConfig::default();
        if let Some(root) = get("STORE_ROOT") {
            engine.store_root = PathBuf::from(root);
        }
        if get("MODEL_TYPE").is_some() || get("DEFINITION_ID").is_some() {
            engine.scope = CacheScope::new(
                get("MODEL_TYPE").unwrap_or_else(|| engine.scope.model_type.clone()),
                get("DEFINITION_ID").unwrap_or_else(|| engine.scope.definition_id.clone()),
            )?;
        }
        if let Some(policy) = get("DELETE_POLICY") {
            engine.delete_policy = policy.parse()?;
        }
        if let Some(raw) = get("TASK_TIMEOUT_SECS") {
            let secs = parse_secs("TASK_TIMEOUT_SECS", &raw)?;
            engine.task_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = get("SESSION_TTL_SECS") {
            engine.session_ttl = Duration::from_secs(parse_secs("SESSION_TTL_SECS", &raw)?);
        }

        Ok(Self { connection, engine })
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ExecutorError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ExecutorError::Config(format!(
            "{ENV_PREFIX}{name}: expected a boolean, got '{other}'"
        ))),
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<u64, ExecutorError> {
    raw.trim()
        .parse()
        .map_err(|e| ExecutorError::Config(format!("{ENV_PREFIX}{name}: {e}")))
}
