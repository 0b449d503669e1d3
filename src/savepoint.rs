//! Savepoint / clone materializer (spec.md §4.10): makes a clone
//! independent of its source by copying every live file the clone does
//! not already have into the destination prefix.

use crate::config::BucketPrefix;
use crate::error::{Error, Result};
use crate::manifest::CloudManifestCoordinator;
use crate::object_store_client::ObjectStoreClient;
use std::sync::Arc;

pub struct SavepointMaterializer {
    store: Arc<ObjectStoreClient>,
}

impl SavepointMaterializer {
    pub fn new(store: Arc<ObjectStoreClient>) -> Self {
        SavepointMaterializer { store }
    }

    /// For each `live_file` name not already present in `destination`,
    /// copy it from `source` under its remapped name (spec.md §4.10).
    /// Returns the names actually copied (files already present at the
    /// destination are left untouched and are not re-copied).
    pub async fn savepoint(
        &self,
        coordinator: &CloudManifestCoordinator,
        live_files: &[String],
    ) -> Result<Vec<String>> {
        if !coordinator.is_clone() {
            return Err(Error::permanent(
                "savepoint",
                anyhow::anyhow!("savepoint is only meaningful for a clone (source != destination)"),
            ));
        }

        let source = coordinator.source();
        let destination = coordinator.destination();
        let mut copied = Vec::new();

        for name in live_files {
            let remapped = coordinator.remap(name);
            if self.store.exists(destination, &remapped).await? {
                continue;
            }
            self.copy_one(source, destination, &remapped).await?;
            copied.push(remapped);
        }

        Ok(copied)
    }

    async fn copy_one(
        &self,
        source: &BucketPrefix,
        destination: &BucketPrefix,
        remapped_name: &str,
    ) -> Result<()> {
        self.store
            .copy(source, remapped_name, destination, remapped_name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManifestEpochStrategy;
    use bytes::Bytes;
    use object_store::memory::InMemory;

    fn shared_store() -> Arc<ObjectStoreClient> {
        Arc::new(ObjectStoreClient::from_store(Arc::new(InMemory::new()), 50))
    }

    #[tokio::test]
    async fn p4_and_scenario6_savepoint_then_source_deletion_leaves_clone_readable() {
        let store = shared_store();
        let source = BucketPrefix::new("b", "src");
        let destination = BucketPrefix::new("b", "dst");

        let coordinator = CloudManifestCoordinator::new(
            store.clone(),
            source.clone(),
            destination.clone(),
            ManifestEpochStrategy::MonotonicCounter,
        );
        // Simulate an open-as-clone-writer having loaded an epoch prefix.
        coordinator.open_as_clone_writer("MANIFEST-1").await.unwrap();

        let remapped = coordinator.remap("7.sst");
        store
            .put(&source, &remapped, Bytes::from_static(b"live data"))
            .await
            .unwrap();

        // Before savepoint, the destination doesn't have it.
        assert!(!store.exists(&destination, &remapped).await.unwrap());

        let materializer = SavepointMaterializer::new(store.clone());
        let copied = materializer
            .savepoint(&coordinator, &["7.sst".to_string()])
            .await
            .unwrap();
        assert_eq!(copied, vec![remapped.clone()]);

        // After savepoint, destination has its own copy...
        assert!(store.exists(&destination, &remapped).await.unwrap());

        // ...and deleting the source object leaves the clone's copy intact.
        store.delete(&source, &remapped).await.unwrap();
        assert!(store.exists(&destination, &remapped).await.unwrap());
        let got = store.get_whole(&destination, &remapped).await.unwrap();
        assert_eq!(got, Bytes::from_static(b"live data"));
    }

    #[tokio::test]
    async fn savepoint_skips_files_already_present_at_destination() {
        let store = shared_store();
        let source = BucketPrefix::new("b", "src");
        let destination = BucketPrefix::new("b", "dst");
        let coordinator = CloudManifestCoordinator::new(
            store.clone(),
            source.clone(),
            destination.clone(),
            ManifestEpochStrategy::MonotonicCounter,
        );
        coordinator.open_as_clone_writer("MANIFEST-1").await.unwrap();

        let remapped = coordinator.remap("7.sst");
        store
            .put(&destination, &remapped, Bytes::from_static(b"already here"))
            .await
            .unwrap();
        // No copy of this name exists at the source at all; if savepoint
        // tried to copy it, this would fail.
        let materializer = SavepointMaterializer::new(store.clone());
        let copied = materializer
            .savepoint(&coordinator, &["7.sst".to_string()])
            .await
            .unwrap();
        assert!(copied.is_empty());
    }

    #[tokio::test]
    async fn savepoint_rejects_non_clone_coordinator() {
        let store = shared_store();
        let prefix = BucketPrefix::new("b", "db");
        let coordinator = CloudManifestCoordinator::new(
            store.clone(),
            prefix.clone(),
            prefix,
            ManifestEpochStrategy::MonotonicCounter,
        );
        let materializer = SavepointMaterializer::new(store);
        let err = materializer.savepoint(&coordinator, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Permanent { .. }));
    }
}
