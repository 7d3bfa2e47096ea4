//! In-process resource store, used by tests and short-lived tooling.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use fleet_core::{validate_segment, Attributes, ResourceKind, ResourceVersion, VersionHandle};
use tokio::sync::Mutex;

use super::{ResourceStore, WriteOptions};
use crate::ExecutorError;

type Key = (ResourceKind, String);

/// [`ResourceStore`] holding every version in memory.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceStore {
    versions: Arc<Mutex<BTreeMap<Key, Vec<ResourceVersion>>>>,
}

impl MemoryResourceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of versions across every resource.
    pub async fn total_versions(&self) -> usize {
        self.versions.lock().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn write(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
        attributes: Attributes,
        options: WriteOptions,
    ) -> Result<VersionHandle, ExecutorError> {
        validate_segment("instance name", instance_name)?;
        let mut versions = self.versions.lock().await;
        let history = versions
            .entry((kind.clone(), instance_name.to_owned()))
            .or_default();
        let next = history.last().map_or(1, |v| v.version + 1);
        let record = ResourceVersion::new(
            kind.clone(),
            instance_name.to_owned(),
            next,
            attributes,
            options.ttl,
        );
        let handle = record.handle();
        history.push(record);
        Ok(handle)
    }

    async fn read_latest(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
    ) -> Result<Option<ResourceVersion>, ExecutorError> {
        Ok(self
            .versions
            .lock()
            .await
            .get(&(kind.clone(), instance_name.to_owned()))
            .and_then(|history| history.last().cloned()))
    }

    async fn read_version(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
        version: u64,
    ) -> Result<Option<ResourceVersion>, ExecutorError> {
        Ok(self
            .versions
            .lock()
            .await
            .get(&(kind.clone(), instance_name.to_owned()))
            .and_then(|history| history.iter().find(|v| v.version == version).cloned()))
    }

    async fn list_versions(
        &self,
        kind: &ResourceKind,
        instance_name: &str,
    ) -> Result<Vec<u64>, ExecutorError> {
        Ok(self
            .versions
            .lock()
            .await
            .get(&(kind.clone(), instance_name.to_owned()))
            .map(|history| history.iter().map(|v| v.version).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    proptest::proptest! {
        #[test]
        fn proptest_write_then_read_latest_returns_written(
            name in "[a-z][a-z0-9-]{0,20}",
            ip in proptest::option::of("10\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}"),
            writes in 1usize..5,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build();
            let rt = match rt {
                Ok(rt) => rt,
                Err(e) => panic!("runtime: {e}"),
            };
            let store = MemoryResourceStore::new();
            let kind = ResourceKind::vm();
            let mut last = Attributes::new();
            for i in 0..writes {
                let mut attrs = Attributes::new();
                attrs.insert("ip".to_owned(), ip.clone().map_or(Value::Null, Value::String));
                attrs.insert("seq".to_owned(), json!(i));
                last = attrs.clone();
                let handle = rt.block_on(store.write(&kind, &name, attrs, WriteOptions::default()));
                proptest::prop_assert!(handle.is_ok());
            }
            let latest = rt.block_on(store.read_latest(&kind, &name));
            let latest = match latest {
                Ok(Some(v)) => v,
                other => panic!("expected a version, got {other:?}"),
            };
            proptest::prop_assert_eq!(latest.attributes, last);
            proptest::prop_assert_eq!(latest.version, writes as u64);
        }
    }

    #[tokio::test]
    async fn versions_are_independent_per_kind() {
        let store = MemoryResourceStore::new();
        let vm = ResourceKind::vm();
        let auth = ResourceKind::auth_session();
        store.write(&vm, "alpha", Attributes::new(), WriteOptions::default()).await.expect("write");
        store.write(&vm, "alpha", Attributes::new(), WriteOptions::default()).await.expect("write");
        let handle = store
            .write(&auth, "alpha", Attributes::new(), WriteOptions::default())
            .await
            .expect("write");
        assert_eq!(handle.version, 1);
        assert_eq!(store.list_versions(&vm, "alpha").await.expect("list"), vec![1, 2]);
        assert_eq!(store.total_versions().await, 3);
    }
}
