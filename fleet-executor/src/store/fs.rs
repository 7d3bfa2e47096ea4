//! Filesystem-backed resource store.
//!
//! Layout: `{root}/{model_type}/{definition_id}/{kind}/{instance}/{version}/`
//! holding `data.json` (the raw payload) and `metadata.json`. A version
//! number is claimed with an exclusive `create_dir`; `metadata.json` is
//! written last and marks the version as committed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::{
    validate_segment, Attributes, CacheScope, ContentHash, ResourceKind, ResourceVersion,
    VersionHandle,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{compute_hash, ResourceStore, WriteOptions};
use crate::ExecutorError;

const DATA_FILE: &str = "data.json";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionMetadata {
    kind: ResourceKind,
    instance_name: String,
    version: u64,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_millis: Option<u64>,
    content_hash: ContentHash,
}

/// [`ResourceStore`] persisting each version as a directory on disk.
#[derive(Debug, Clone)]
pub struct FsResourceStore {
    base: PathBuf,
}

impl FsResourceStore {
    /// Open a store rooted at `root` for `scope`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl AsRef<Path>, scope: &CacheScope) -> Self {
        Self {
            base: root
                .as_ref()
                .join(&scope.model_type)
                .join(&scope.definition_id),
        }
    }

    /// Directory holding every scoped resource.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    fn instance_dir(&self, kind: &ResourceKind, instance_name: &str) -> Result<PathBuf, ExecutorError> {
        validate_segment("resource kind", kind.as_str())?;
        validate_segment("instance name", instance_name)?;
        Ok(self.base.join(kind.as_str()).join(instance_name))
    }

    /// Every version directory number, committed or not, ascending.
    async fn claimed_versions(dir: &Path) -> Result<Vec<u64>, ExecutorError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(version) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    async fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<(), ExecutorError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn load(dir: &Path, version: u64) -> Result<Option<ResourceVersion>, ExecutorError> {
        let version_dir = dir.join(version.to_string());
        let metadata_raw = match tokio::fs::read(version_dir.join(METADATA_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let metadata: VersionMetadata = serde_json::from_slice(&metadata_raw)?;
        let payload = tokio::fs::read(version_dir.join(DATA_FILE)).await?;

        let actual = compute_hash(&payload);
        if actual != metadata.content_hash {
            return Err(ExecutorError::Store(format!(
                "{}: content hash mismatch (expected {}, found {actual})",
                version_dir.display(),
                metadata.content_hash
            )));
        }

        let attributes = match serde_json::from_slice(&payload)? {
            Value::Object(map) => map,
            other => {
                return Err(ExecutorError::Store(format!(
                    "{}: payload is not a JSON object: {other}",
                    version_dir.display()
                )))
            }
        };

        let mut loaded = ResourceVersion::new(
            metadata.kind,
            metadata.instance_name,
            metadata.version,
            attributes,
            metadata.ttl_millis.map(Duration::from_millis),
        );
        loaded.created_at = metadata.created_at;
        Ok(Some(loaded))
    }
}

#[async_trait]
impl ResourceStore for FsResourceStore {
    async fn write(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
        attributes: Attributes,
        options: WriteOptions,
    ) -> Result<VersionHandle, ExecutorError> {
        let dir = self.instance_dir(kind, instance_name)?;
        tokio::fs::create_dir_all(&dir).await?;

        // Claim the next number; a concurrent writer that wins the race
        // forces us onto the following one.
        let (version, version_dir) = loop {
            let next = Self::claimed_versions(&dir).await?.last().copied().unwrap_or(0) + 1;
            let candidate = dir.join(next.to_string());
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => break (next, candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        };

        let payload = serde_json::to_vec_pretty(&Value::Object(attributes.clone()))?;
        let record = ResourceVersion::new(
            kind.clone(),
            instance_name.to_owned(),
            version,
            attributes,
            options.ttl,
        );
        let metadata = VersionMetadata {
            kind: kind.clone(),
            instance_name: instance_name.to_owned(),
            version,
            created_at: record.created_at,
            ttl_millis: options
                .ttl
                .map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
            content_hash: compute_hash(&payload),
        };

        Self::write_file_atomic(&version_dir.join(DATA_FILE), &payload).await?;
        Self::write_file_atomic(
            &version_dir.join(METADATA_FILE),
            &serde_json::to_vec_pretty(&metadata)?,
        )
        .await?;

        tracing::debug!(
            kind = %kind,
            instance = instance_name,
            version,
            path = %version_dir.display(),
            "resource version written"
        );

        Ok(record.handle())
    }

    async fn read_latest(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
    ) -> Result<Option<ResourceVersion>, ExecutorError> {
        let dir = self.instance_dir(kind, instance_name)?;
        for version in Self::claimed_versions(&dir).await?.into_iter().rev() {
            if let Some(found) = Self::load(&dir, version).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn read_version(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
        version: u64,
    ) -> Result<Option<ResourceVersion>, ExecutorError> {
        let dir = self.instance_dir(kind, instance_name)?;
        Self::load(&dir, version).await
    }

    async fn list_versions(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
    ) -> Result<Vec<u64>, ExecutorError> {
        let dir = self.instance_dir(kind, instance_name)?;
        let mut committed = Vec::new();
        for version in Self::claimed_versions(&dir).await? {
            if tokio::fs::try_exists(dir.join(version.to_string()).join(METADATA_FILE)).await? {
                committed.push(version);
            }
        }
        Ok(committed)
    }
}
