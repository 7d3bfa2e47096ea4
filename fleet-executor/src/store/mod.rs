//! Append-only, versioned, name-addressed resource persistence.
//!
//! Every write appends a new version under `(kind, instance_name)`; existing
//! versions are never modified. Readers take the highest version.

mod fs;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{Attributes, ContentHash, ResourceKind, ResourceVersion, VersionHandle};
use sha2::{Digest, Sha256};

use crate::ExecutorError;

pub use fs::FsResourceStore;
pub use memory::MemoryResourceStore;

/// Options for a single write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct WriteOptions {
    /// Freshness window recorded with the version.
    pub ttl: Option<Duration>,
}

impl WriteOptions {
    /// Options carrying a TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Versioned store of JSON resources.
///
/// # Cancel Safety
/// A write cancelled mid-way may leave a claimed but uncommitted version,
/// which readers skip. Committed versions are never affected.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Append a new version and return its handle.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Core`] if `instance_name` is not a valid name,
    /// or a store/I/O error if persisting fails.
    async fn write(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
        attributes: Attributes,
        options: WriteOptions,
    ) -> Result<VersionHandle, ExecutorError>;

    /// Read the highest committed version, if any.
    ///
    /// # Errors
    /// Returns a store/I/O error if the version exists but cannot be read.
    async fn read_latest(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
    ) -> Result<Option<ResourceVersion>, ExecutorError>;

    /// Read one specific version.
    ///
    /// # Errors
    /// Returns a store/I/O error if the version exists but cannot be read.
    async fn read_version(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
        version: u64,
    ) -> Result<Option<ResourceVersion>, ExecutorError>;

    /// Committed version numbers in ascending order.
    ///
    /// # Errors
    /// Returns a store/I/O error if the listing fails.
    async fn list_versions(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
    ) -> Result<Vec<u64>, ExecutorError>;
}

/// SHA-256 of a stored payload.
///
/// # Complexity
/// O(n) in the payload length.
#[must_use]
pub fn compute_hash(payload: &[u8]) -> ContentHash {
    let digest = Sha256::digest(payload);
    ContentHash::new(digest.into())
}
