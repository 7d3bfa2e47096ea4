use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// JSON object stored as the payload of one resource version.
pub type Attributes = Map<String, Value>;

/// Category of a named resource (e.g. `vm`, `auth-session`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ResourceKind(pub String);

impl ResourceKind {
    /// Kind under which VM records are written, one instance per VM name.
    pub const VM: &'static str = "vm";
    /// Kind under which authenticated sessions are cached.
    pub const AUTH_SESSION: &'static str = "auth-session";

    /// Creates a kind, validating it as a storage path segment.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidName`] if `kind` is not a safe path segment.
    pub fn new(kind: impl Into<String>) -> Result<Self, CoreError> {
        let kind = kind.into();
        validate_segment("resource kind", &kind)?;
        Ok(Self(kind))
    }

    /// The kind used for VM records.
    #[must_use]
    pub fn vm() -> Self {
        Self(Self::VM.to_owned())
    }

    /// The kind used for cached sessions.
    #[must_use]
    pub fn auth_session() -> Self {
        Self(Self::AUTH_SESSION.to_owned())
    }

    /// Returns the kind as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `(model-type, definition-id)` pair every stored resource lives under.
///
/// The session cache and VM records of one deployment share a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CacheScope {
    /// Model type, e.g. `proxmox-fleet`.
    pub model_type: String,
    /// Definition id of the model instance.
    pub definition_id: String,
}

impl CacheScope {
    /// Creates a scope, validating both parts as path segments.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidName`] if either part is not a safe path segment.
    pub fn new(
        model_type: impl Into<String>,
        definition_id: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let model_type = model_type.into();
        let definition_id = definition_id.into();
        validate_segment("model type", &model_type)?;
        validate_segment("definition id", &definition_id)?;
        Ok(Self {
            model_type,
            definition_id,
        })
    }
}

impl Default for CacheScope {
    fn default() -> Self {
        Self {
            model_type: "proxmox-fleet".to_owned(),
            definition_id: "default".to_owned(),
        }
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model_type, self.definition_id)
    }
}

/// One immutable version of a named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ResourceVersion {
    /// Resource category.
    pub kind: ResourceKind,
    /// Caller-assigned instance name.
    pub instance_name: String,
    /// Monotonically increasing per `(kind, instance_name)`, starting at 1.
    pub version: u64,
    /// The stored payload.
    pub attributes: Attributes,
    /// When the version was written.
    pub created_at: DateTime<Utc>,
    /// Optional freshness window for readers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
}

impl ResourceVersion {
    /// Creates a version written now.
    #[must_use]
    pub fn new(
        kind: ResourceKind,
        instance_name: String,
        version: u64,
        attributes: Attributes,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            kind,
            instance_name,
            version,
            attributes,
            created_at: Utc::now(),
            ttl,
        }
    }

    /// Address of this version.
    #[must_use]
    pub fn handle(&self) -> VersionHandle {
        VersionHandle {
            kind: self.kind.clone(),
            instance_name: self.instance_name.clone(),
            version: self.version,
            created_at: self.created_at,
        }
    }

    /// Whether the version's TTL has elapsed at `now`. Versions without a TTL never expire.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => (now - self.created_at).to_std().is_ok_and(|age| age >= ttl),
            None => false,
        }
    }
}

/// Address of a written resource version, returned by every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct VersionHandle {
    /// Resource category.
    pub kind: ResourceKind,
    /// Instance name.
    pub instance_name: String,
    /// Version number.
    pub version: u64,
    /// When the version was written.
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for VersionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.kind, self.instance_name, self.version)
    }
}

/// Validate a name used as a single storage path segment.
///
/// # Errors
/// Returns [`CoreError::InvalidName`] for empty names, `.`/`..`, or names
/// containing a path separator or NUL.
pub fn validate_segment(field: &'static str, value: &str) -> Result<(), CoreError> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value == "." || value == ".." {
        Some("must not be a relative path component")
    } else if value.contains(['/', '\\', '\0']) {
        Some("must not contain a path separator or NUL")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::InvalidName {
            field,
            value: value.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}
