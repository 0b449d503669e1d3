//! Cloud-manifest coordinator (spec.md §4.5). The heart of the system:
//! the pointer-object names which engine-manifest is authoritative, and
//! last-writer-wins ownership falls naturally out of "overwrite the
//! pointer, the object it names is already durable."

use crate::config::{BucketPrefix, ManifestEpochStrategy};
use crate::error::{Error, Result};
use crate::manifest::epoch::Epoch;
use crate::object_store_client::ObjectStoreClient;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;

pub const CLOUDMANIFEST_KEY: &str = "CLOUDMANIFEST";

/// State owned by the coordinator and mutated only by the owner thread
/// executing an epoch bump (spec.md §5).
#[derive(Debug, Clone, Default)]
struct CoordinatorState {
    /// The engine-manifest name this process currently treats as
    /// authoritative, e.g. `<epoch>.MANIFEST-7`.
    current_manifest_name: Option<String>,
    /// The epoch-prefix portion used by `remap` (spec.md §4.5 "Read path
    /// via the pointer").
    epoch_prefix: Option<String>,
}

/// The result of successfully opening a prefix as a writer: this process
/// is now the owner of record (spec.md §4.5 step 6).
#[derive(Debug, Clone)]
pub struct WriterOpen {
    pub epoch: Epoch,
    pub new_manifest_name: String,
    /// The prior authoritative engine-manifest's contents, for the engine
    /// to replay. `None` on a fresh prefix.
    pub prior_manifest_contents: Option<Bytes>,
}

/// The result of opening a prefix as a reader: no pointer write occurs.
#[derive(Debug, Clone)]
pub struct ReaderOpen {
    pub manifest_name: String,
    pub manifest_contents: Bytes,
}

pub struct CloudManifestCoordinator {
    store: Arc<ObjectStoreClient>,
    /// Read from.
    source: BucketPrefix,
    /// Written to; equal to `source` for a plain (non-clone) open.
    destination: BucketPrefix,
    strategy: ManifestEpochStrategy,
    state: RwLock<CoordinatorState>,
}

impl CloudManifestCoordinator {
    pub fn new(
        store: Arc<ObjectStoreClient>,
        source: BucketPrefix,
        destination: BucketPrefix,
        strategy: ManifestEpochStrategy,
    ) -> Self {
        CloudManifestCoordinator {
            store,
            source,
            destination,
            strategy,
            state: RwLock::new(CoordinatorState::default()),
        }
    }

    pub fn source(&self) -> &BucketPrefix {
        &self.source
    }

    pub fn destination(&self) -> &BucketPrefix {
        &self.destination
    }

    pub fn is_clone(&self) -> bool {
        self.source != self.destination
    }

    /// Read the pointer-object in `prefix`, returning the engine-manifest
    /// name it names, or `None` on a fresh prefix (spec.md §4.5 step 1).
    async fn read_pointer_in(&self, prefix: &BucketPrefix) -> Result<Option<String>> {
        match self.store.get_whole(prefix, CLOUDMANIFEST_KEY).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim().to_string())),
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Atomically overwrite the pointer-object (spec.md §4.5 step 5:
    /// "overwrite-put; object stores are single-key atomic").
    async fn write_pointer(&self, prefix: &BucketPrefix, manifest_name: &str) -> Result<()> {
        self.store
            .put(
                prefix,
                CLOUDMANIFEST_KEY,
                Bytes::copy_from_slice(manifest_name.as_bytes()),
            )
            .await
    }

    /// Steps 1-2: read the pointer and fetch the engine-manifest it names.
    /// `Corruption` if the pointer names an object that no longer exists
    /// (spec.md §7: "dangling pointer is fatal").
    async fn fetch_named(&self, prefix: &BucketPrefix) -> Result<Option<(String, Bytes)>> {
        let Some(name) = self.read_pointer_in(prefix).await? else {
            return Ok(None);
        };
        match self.store.get_whole(prefix, &name).await {
            Ok(bytes) => Ok(Some((name, bytes))),
            Err(Error::NotFound(_)) => Err(Error::Corruption(format!(
                "cloud-manifest pointer names '{name}' which does not exist in {prefix}"
            ))),
            Err(err) => Err(err),
        }
    }

    /// Open-as-writer protocol (spec.md §4.5 steps 1-6), for a plain
    /// (non-clone) open: `source == destination`.
    pub async fn open_as_writer(&self, engine_base_name: &str) -> Result<WriterOpen> {
        self.store.create_bucket(&self.destination).await?;

        let prior = self.fetch_named(&self.source).await?;
        let epoch = Epoch::mint(self.strategy);
        let new_name = epoch.prefix_name(engine_base_name);

        {
            let mut state = self.state.write();
            state.current_manifest_name = Some(new_name.clone());
            state.epoch_prefix = Some(epoch.to_string());
        }

        Ok(WriterOpen {
            epoch,
            new_manifest_name: new_name,
            prior_manifest_contents: prior.map(|(_, bytes)| bytes),
        })
    }

    /// Invariant P1: must be called only after `new_manifest_contents` is
    /// already durable at `new_manifest_name` (spec.md §4.5 invariants:
    /// "after a successful pointer update, the engine-manifest it names is
    /// already durable").
    pub async fn commit_writer_open(
        &self,
        new_manifest_name: &str,
        new_manifest_contents: Bytes,
    ) -> Result<()> {
        self.store
            .put(&self.destination, new_manifest_name, new_manifest_contents)
            .await?;
        self.write_pointer(&self.destination, new_manifest_name).await
    }

    /// Open-as-reader: identical read path, no pointer write.
    pub async fn open_as_reader(&self) -> Result<ReaderOpen> {
        let Some((name, contents)) = self.fetch_named(&self.source).await? else {
            return Err(Error::Corruption(format!(
                "no cloud-manifest pointer present in {}",
                self.source
            )));
        };
        let epoch_prefix = name.split_once('.').map(|(e, _)| e.to_string());
        {
            let mut state = self.state.write();
            state.current_manifest_name = Some(name.clone());
            state.epoch_prefix = epoch_prefix;
        }
        Ok(ReaderOpen {
            manifest_name: name,
            manifest_contents: contents,
        })
    }

    /// Clone open (spec.md §4.5 "Clone open"): read the source pointer,
    /// copy the engine-manifest *name* (by reference only, no data
    /// motion) into the destination, then run the writer open protocol
    /// against destination.
    pub async fn open_as_clone_writer(&self, engine_base_name: &str) -> Result<WriterOpen> {
        assert!(self.is_clone(), "open_as_clone_writer requires source != destination");

        let prior = self.fetch_named(&self.source).await?;
        if let Some((name, _)) = &prior {
            self.write_pointer(&self.destination, name).await?;
        }

        let epoch = Epoch::mint(self.strategy);
        let new_name = epoch.prefix_name(engine_base_name);
        {
            let mut state = self.state.write();
            state.current_manifest_name = Some(new_name.clone());
            state.epoch_prefix = Some(epoch.to_string());
        }

        Ok(WriterOpen {
            epoch,
            new_manifest_name: new_name,
            prior_manifest_contents: prior.map(|(_, bytes)| bytes),
        })
    }

    /// `remap(name) = epoch_prefix || strip_epoch(name)` (spec.md §4.5
    /// "Read path via the pointer").
    pub fn remap(&self, name: &str) -> String {
        let stripped = crate::classify::strip_epoch(name);
        match &self.state.read().epoch_prefix {
            Some(epoch_prefix) => format!("{epoch_prefix}.{stripped}"),
            None => stripped.to_string(),
        }
    }

    pub fn current_manifest_name(&self) -> Option<String> {
        self.state.read().current_manifest_name.clone()
    }

    /// The epoch-prefix this coordinator currently has loaded, if any.
    /// Used to tag outgoing WAL records with the writer's epoch.
    pub fn epoch_prefix(&self) -> Option<String> {
        self.state.read().epoch_prefix.clone()
    }
}
