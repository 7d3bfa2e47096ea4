//! Hypervisor session resolution.
//!
//! Resolution order, first match wins:
//! 1. explicit ticket + anti-CSRF token from the caller, used verbatim;
//! 2. the cached session, if younger than the TTL (skipped with `skip_cache`);
//! 3. a username/password exchange, whose result is written back to the cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::{Attributes, AuthSession, ResourceKind, SessionSource, VersionHandle};
use serde::Serialize;
use serde_json::{json, Value};

use crate::api::HypervisorApi;
use crate::config::ConnectionParams;
use crate::store::{ResourceStore, WriteOptions};
use crate::ExecutorError;

/// Instance name of the session slot within the `auth-session` kind.
pub const SESSION_INSTANCE: &str = "current";

/// Explicit get/put/invalidate access to the cached session.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// The most recently cached session, if any.
    ///
    /// # Errors
    /// Returns a store error if the cache cannot be read.
    async fn get(&self) -> Result<Option<AuthSession>, ExecutorError>;

    /// Cache `session` for `ttl`.
    ///
    /// # Errors
    /// Returns a store error if the cache cannot be written.
    async fn put(&self, session: &AuthSession, ttl: Duration) -> Result<VersionHandle, ExecutorError>;

    /// Make subsequent [`SessionCache::get`] calls return `None` until the next `put`.
    ///
    /// # Errors
    /// Returns a store error if the cache cannot be written.
    async fn invalidate(&self) -> Result<(), ExecutorError>;
}

/// [`SessionCache`] persisted as versions of the `auth-session` resource.
///
/// Invalidation appends a tombstone version rather than deleting history.
#[derive(Clone)]
pub struct StoreSessionCache {
    store: Arc<dyn ResourceStore>,
}

impl StoreSessionCache {
    /// Cache sessions in `store`.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SessionCache for StoreSessionCache {
    async fn get(&self) -> Result<Option<AuthSession>, ExecutorError> {
        let Some(latest) = self
            .store
            .read_latest(&ResourceKind::auth_session(), SESSION_INSTANCE)
            .await?
        else {
            return Ok(None);
        };
        if latest.attributes.get("invalidated") == Some(&Value::Bool(true)) {
            return Ok(None);
        }
        let session = serde_json::from_value(Value::Object(latest.attributes))?;
        Ok(Some(session))
    }

    async fn put(&self, session: &AuthSession, ttl: Duration) -> Result<VersionHandle, ExecutorError> {
        let Value::Object(attributes) = serde_json::to_value(session)? else {
            return Err(ExecutorError::Store("session did not serialize to an object".to_owned()));
        };
        self.store
            .write(
                &ResourceKind::auth_session(),
                SESSION_INSTANCE,
                attributes,
                WriteOptions::with_ttl(ttl),
            )
            .await
    }

    async fn invalidate(&self) -> Result<(), ExecutorError> {
        let mut tombstone = Attributes::new();
        tombstone.insert("invalidated".to_owned(), Value::Bool(true));
        tombstone.insert("invalidatedAt".to_owned(), json!(Utc::now()));
        self.store
            .write(
                &ResourceKind::auth_session(),
                SESSION_INSTANCE,
                tombstone,
                WriteOptions::default(),
            )
            .await
            .map(|_| ())
    }
}

/// Per-call resolution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ResolveOptions {
    /// Ignore the cache and go straight to a password exchange.
    pub skip_cache: bool,
}

impl ResolveOptions {
    /// Options that bypass the session cache.
    #[must_use]
    pub fn bypass_cache() -> Self {
        Self { skip_cache: true }
    }
}

/// A session together with where it came from.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ResolvedSession {
    pub session: AuthSession,
    pub source: SessionSource,
    /// Cache version written for a freshly minted session.
    pub cached_as: Option<VersionHandle>,
}

/// Secret-free summary of a resolution, safe to return to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AuthReport {
    pub principal: String,
    pub source: SessionSource,
    pub obtained_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionHandle>,
}

impl From<&ResolvedSession> for AuthReport {
    fn from(resolved: &ResolvedSession) -> Self {
        Self {
            principal: resolved.session.principal.clone(),
            source: resolved.source,
            obtained_at: resolved.session.obtained_at,
            version: resolved.cached_as.clone(),
        }
    }
}

/// Resolves usable hypervisor sessions.
#[derive(Clone)]
pub struct AuthSessionManager {
    api: HypervisorApi,
    cache: Arc<dyn SessionCache>,
    ttl: Duration,
}

impl AuthSessionManager {
    /// Create a manager that reuses cached sessions younger than `ttl`.
    pub fn new(api: HypervisorApi, cache: Arc<dyn SessionCache>, ttl: Duration) -> Self {
        Self { api, cache, ttl }
    }

    /// Resolve a session for `params`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Config`] when no tier can produce a session,
    /// [`ExecutorError::AuthFailed`] when the password exchange is rejected,
    /// or a store error if a fresh session cannot be cached.
    pub async fn resolve(
        &self,
        params: &ConnectionParams,
        options: ResolveOptions,
    ) -> Result<ResolvedSession, ExecutorError> {
        if let (Some(ticket), Some(csrf)) = (&params.ticket, &params.csrf_token) {
            let principal = params.username.clone().unwrap_or_default();
            tracing::debug!(%principal, "using explicit session");
            return Ok(ResolvedSession {
                session: AuthSession::new(ticket.as_str(), csrf.as_str(), principal),
                source: SessionSource::Explicit,
                cached_as: None,
            });
        }

        if !options.skip_cache {
            match self.cache.get().await {
                Ok(Some(cached)) if cached.is_fresh(self.ttl, Utc::now()) => {
                    tracing::debug!(
                        principal = %cached.principal,
                        age_secs = cached.age(Utc::now()).as_secs(),
                        "reusing cached session"
                    );
                    return Ok(ResolvedSession {
                        session: cached,
                        source: SessionSource::Cache,
                        cached_as: None,
                    });
                }
                Ok(Some(stale)) => {
                    tracing::debug!(principal = %stale.principal, "cached session expired");
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "session cache unreadable; re-authenticating"),
            }
        }

        let (Some(username), Some(password)) = (&params.username, &params.password) else {
            return Err(ExecutorError::Config(
                "no explicit ticket/CSRF token, no fresh cached session, and no username/password configured"
                    .to_owned(),
            ));
        };

        tracing::info!(%username, node = self.api.node(), "authenticating with password");
        let session = self.api.create_ticket(username, password).await?;
        let version = self.cache.put(&session, self.ttl).await?;
        tracing::info!(principal = %session.principal, %version, "session cached");

        Ok(ResolvedSession {
            session,
            source: SessionSource::Password,
            cached_as: Some(version),
        })
    }

    /// Explicit authentication: always bypasses the cache.
    ///
    /// # Errors
    /// See [`AuthSessionManager::resolve`].
    pub async fn authenticate(&self, params: &ConnectionParams) -> Result<ResolvedSession, ExecutorError> {
        self.resolve(params, ResolveOptions::bypass_cache()).await
    }

    /// Drop the cached session.
    ///
    /// # Errors
    /// Returns a store error if the tombstone cannot be written.
    pub async fn invalidate(&self) -> Result<(), ExecutorError> {
        self.cache.invalidate().await
    }
}
