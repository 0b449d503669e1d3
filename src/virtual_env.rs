//! Virtual environment dispatcher (spec.md §4.4): the single façade the
//! storage engine talks to. Every path is classified by `classify` and
//! routed to the object store, the log stream, or the local filesystem —
//! structurally the same wrap-and-delegate shape as the teacher's
//! `MockStore` in `sui-analytics-indexer/tests/mock_store.rs`, generalized
//! here from "wrap one store" to "route across three backends."

use crate::classify::{classify, strip_epoch, FileClass};
use crate::config::{BucketPrefix, CloudEnvOptions};
use crate::dbid::DbidRegistry;
use crate::deferred_delete::DeferredDeleteScheduler;
use crate::error::{Error, Result};
use crate::global_init::GlobalInitGuard;
use crate::manifest::{CloudManifestCoordinator, ReaderOpen, WriterOpen};
use crate::metrics::CloudEnvMetrics;
use crate::object_store_client::ObjectStoreClient;
use crate::posix_env::PosixEnv;
use crate::stream_client::{StreamClient, WalOp};
use crate::tailer::{LogTailer, TailerHealth};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const CACHE_DIR: &str = "cache";
const DEFAULT_SHARD: &str = "shard-0";
/// Local bookkeeping directories that must never surface in a
/// `list_children` result; they are not engine-visible files.
const INTERNAL_DIRS: &[&str] = &[CACHE_DIR, "tailer-checkpoint", "dbids"];

fn local_cache_path(logical_path: &str) -> String {
    format!("{CACHE_DIR}/{logical_path}")
}

/// Everything that only exists when a cloud backend is actually
/// configured. `VirtualEnv::local_only` constructs an environment with
/// none of this, so a plain local engine pays no coordinator/stream/dbid
/// overhead (spec.md §6: "if dst is None, writes are local only").
struct CloudHandles {
    object_store: Arc<ObjectStoreClient>,
    stream: Option<Arc<StreamClient>>,
    stream_name: Option<String>,
    coordinator: CloudManifestCoordinator,
    dbids: DbidRegistry,
    deferred_delete: Arc<DeferredDeleteScheduler>,
    tailer: Option<Arc<LogTailer>>,
}

struct Inner {
    options: CloudEnvOptions,
    posix: PosixEnv,
    cloud: Option<CloudHandles>,
    running: Arc<AtomicBool>,
    metrics: Arc<CloudEnvMetrics>,
    _global: Arc<GlobalInitGuard>,
}

/// The storage engine's entire view of "the filesystem" (spec.md §4.4).
/// Cheaply `Clone`: internally an `Arc`, so a `WritableFile` can hold its
/// own handle back to the environment that created it without the
/// environment needing to track open files.
#[derive(Clone)]
pub struct VirtualEnv(Arc<Inner>);

impl VirtualEnv {
    /// A local-only environment: every path, regardless of class, is
    /// served from `options.local_cache_dir` (spec.md §6).
    pub fn local_only(options: CloudEnvOptions) -> VirtualEnv {
        let posix = PosixEnv::new(options.local_cache_dir.clone());
        VirtualEnv(Arc::new(Inner {
            options,
            posix,
            cloud: None,
            running: Arc::new(AtomicBool::new(true)),
            metrics: Arc::new(CloudEnvMetrics::new_unregistered()),
            _global: GlobalInitGuard::acquire(),
        }))
    }

    /// Open-as-writer (spec.md §4.5): runs the cloud-manifest writer
    /// protocol, registers a fresh dbid identity if one is given, and
    /// starts the deferred-delete sweeper and (if a stream is configured)
    /// the log-tailer as background tasks.
    pub async fn open_as_writer(
        options: CloudEnvOptions,
        object_store: Arc<ObjectStoreClient>,
        stream: Option<Arc<StreamClient>>,
        stream_name: Option<String>,
        engine_base_manifest_name: &str,
        dbid_identity: Option<&str>,
    ) -> Result<(VirtualEnv, WriterOpen)> {
        let destination = options.dst.clone().ok_or_else(|| {
            Error::permanent(
                "virtual_env::open_as_writer",
                anyhow::anyhow!("no destination prefix configured; use local_only instead"),
            )
        })?;
        let source = options.src.clone().unwrap_or_else(|| destination.clone());

        let coordinator = CloudManifestCoordinator::new(
            object_store.clone(),
            source.clone(),
            destination.clone(),
            options.manifest_epoch_strategy,
        );
        let writer_open = if coordinator.is_clone() {
            coordinator.open_as_clone_writer(engine_base_manifest_name).await?
        } else {
            coordinator.open_as_writer(engine_base_manifest_name).await?
        };

        let dbids = DbidRegistry::new(object_store.clone());
        if let Some(identity) = dbid_identity {
            if dbids.lookup(&destination, identity).await?.is_none() {
                dbids
                    .register(&destination, identity, &source, writer_open.epoch.as_str())
                    .await?;
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let deferred_delete = DeferredDeleteScheduler::new(object_store.clone(), options.file_deletion_delay);
        tokio::spawn(deferred_delete.clone().run(running.clone()));

        // No tailer here: a writer appends to its own local cache directly
        // (see `WritableFile::append`) and would otherwise double-apply its
        // own records by also replaying them back off the stream. The
        // tailer exists for `open_as_reader` callers, which have no other
        // way to see log content (spec.md §4.7).
        let posix = PosixEnv::new(options.local_cache_dir.clone());
        let metrics = Arc::new(CloudEnvMetrics::new_unregistered());
        let cloud = CloudHandles {
            object_store,
            stream,
            stream_name,
            coordinator,
            dbids,
            deferred_delete,
            tailer: None,
        };

        let env = VirtualEnv(Arc::new(Inner {
            options,
            posix,
            cloud: Some(cloud),
            running,
            metrics,
            _global: GlobalInitGuard::acquire(),
        }));

        Ok((env, writer_open))
    }

    /// Open-as-reader (spec.md §4.5): identical read path, no pointer
    /// write. Useful for read-only inspection tools and for an opened
    /// clone's source-side readers.
    pub async fn open_as_reader(
        options: CloudEnvOptions,
        object_store: Arc<ObjectStoreClient>,
        stream: Option<Arc<StreamClient>>,
        stream_name: Option<String>,
    ) -> Result<(VirtualEnv, ReaderOpen)> {
        let source = options.src.clone().ok_or_else(|| {
            Error::permanent(
                "virtual_env::open_as_reader",
                anyhow::anyhow!("no source prefix configured"),
            )
        })?;
        let destination = options.dst.clone().unwrap_or_else(|| source.clone());

        let coordinator = CloudManifestCoordinator::new(
            object_store.clone(),
            source.clone(),
            destination,
            options.manifest_epoch_strategy,
        );
        let reader_open = coordinator.open_as_reader().await?;

        let dbids = DbidRegistry::new(object_store.clone());
        let running = Arc::new(AtomicBool::new(true));
        let deferred_delete = DeferredDeleteScheduler::new(object_store.clone(), options.file_deletion_delay);
        tokio::spawn(deferred_delete.clone().run(running.clone()));

        let metrics = Arc::new(CloudEnvMetrics::new_unregistered());
        let instance_id = format!("reader-{}", reader_open.manifest_name);
        let tailer = spawn_tailer(
            &stream,
            &stream_name,
            &object_store,
            &source,
            &instance_id,
            &options,
            &running,
            &metrics,
        );

        let posix = PosixEnv::new(options.local_cache_dir.clone());
        let cloud = CloudHandles {
            object_store,
            stream,
            stream_name,
            coordinator,
            dbids,
            deferred_delete,
            tailer,
        };

        let env = VirtualEnv(Arc::new(Inner {
            options,
            posix,
            cloud: Some(cloud),
            running,
            metrics,
            _global: GlobalInitGuard::acquire(),
        }));

        Ok((env, reader_open))
    }

    /// Stop this environment's background tasks (deferred-delete sweeper,
    /// log-tailer). Cooperative: tasks observe this on their next wake.
    pub fn shutdown(&self) {
        self.0.running.store(false, Ordering::Relaxed);
    }

    pub fn coordinator(&self) -> Option<&CloudManifestCoordinator> {
        self.0.cloud.as_ref().map(|c| &c.coordinator)
    }

    pub fn object_store(&self) -> Option<&Arc<ObjectStoreClient>> {
        self.0.cloud.as_ref().map(|c| &c.object_store)
    }

    pub fn dbids(&self) -> Option<&DbidRegistry> {
        self.0.cloud.as_ref().map(|c| &c.dbids)
    }

    pub fn metrics(&self) -> &Arc<CloudEnvMetrics> {
        &self.0.metrics
    }

    pub fn tailer_health(&self) -> Option<TailerHealth> {
        self.0.cloud.as_ref()?.tailer.as_ref().map(|t| t.health())
    }

    /// Create a brand-new file for writing (spec.md §4.4 "new-writable-file").
    /// Always starts empty: the engine never reopens an existing name for
    /// append through this call.
    pub async fn new_writable_file(&self, logical_path: &str) -> Result<WritableFile> {
        let class = classify(logical_path);
        let local_path = match class {
            FileClass::Other => logical_path.to_string(),
            FileClass::Data | FileClass::Log => local_cache_path(logical_path),
        };
        self.0.posix.write_file(&local_path, b"").await?;
        Ok(WritableFile {
            class,
            logical_path: logical_path.to_string(),
            local_path,
            env: self.clone(),
            closed: false,
        })
    }

    pub async fn read_range(&self, logical_path: &str, offset: u64, len: u64) -> Result<Bytes> {
        match classify(logical_path) {
            FileClass::Data => {
                let local_path = local_cache_path(logical_path);
                if self.0.posix.exists(&local_path).await {
                    return Ok(Bytes::from(self.0.posix.read_range(&local_path, offset, len).await?));
                }
                let cloud = self.require_cloud(logical_path)?;
                let remote_name = self.resolve_data_key(cloud, logical_path).await?;
                cloud
                    .object_store
                    .get(cloud.coordinator.source(), &remote_name, offset as usize, len as usize)
                    .await
            }
            FileClass::Log => {
                self.check_tailer_health()?;
                let local_path = local_cache_path(logical_path);
                Ok(Bytes::from(self.0.posix.read_range(&local_path, offset, len).await?))
            }
            FileClass::Other => Ok(Bytes::from(self.0.posix.read_range(logical_path, offset, len).await?)),
        }
    }

    pub async fn read_whole(&self, logical_path: &str) -> Result<Bytes> {
        let size = self.get_size(logical_path).await?;
        self.read_range(logical_path, 0, size).await
    }

    pub async fn file_exists(&self, logical_path: &str) -> Result<bool> {
        match classify(logical_path) {
            FileClass::Data => {
                let local_path = local_cache_path(logical_path);
                if self.0.posix.exists(&local_path).await {
                    return Ok(true);
                }
                let Some(cloud) = &self.0.cloud else { return Ok(false) };
                Ok(self.resolve_data_key(cloud, logical_path).await.is_ok())
            }
            FileClass::Log => Ok(self.0.posix.exists(&local_cache_path(logical_path)).await),
            FileClass::Other => Ok(self.0.posix.exists(logical_path).await),
        }
    }

    pub async fn get_size(&self, logical_path: &str) -> Result<u64> {
        match classify(logical_path) {
            FileClass::Data => {
                let local_path = local_cache_path(logical_path);
                if self.0.posix.exists(&local_path).await {
                    return self.0.posix.size(&local_path).await;
                }
                let cloud = self.require_cloud(logical_path)?;
                let remote_name = self.resolve_data_key(cloud, logical_path).await?;
                let head = cloud.object_store.head(cloud.coordinator.source(), &remote_name).await?;
                Ok(head.size as u64)
            }
            FileClass::Log => self.0.posix.size(&local_cache_path(logical_path)).await,
            FileClass::Other => self.0.posix.size(logical_path).await,
        }
    }

    pub async fn get_mtime(&self, logical_path: &str) -> Result<chrono::DateTime<chrono::Utc>> {
        match classify(logical_path) {
            FileClass::Data => {
                let local_path = local_cache_path(logical_path);
                if self.0.posix.exists(&local_path).await {
                    return self.0.posix.mtime(&local_path).await;
                }
                let cloud = self.require_cloud(logical_path)?;
                let remote_name = self.resolve_data_key(cloud, logical_path).await?;
                let head = cloud.object_store.head(cloud.coordinator.source(), &remote_name).await?;
                Ok(head.mtime)
            }
            FileClass::Log => self.0.posix.mtime(&local_cache_path(logical_path)).await,
            FileClass::Other => self.0.posix.mtime(logical_path).await,
        }
    }

    /// Data and Log deletes are asynchronous with respect to this call
    /// returning (spec.md §4.8, §4.3); `Other` deletes are immediate.
    pub async fn delete_file(&self, logical_path: &str) -> Result<()> {
        match classify(logical_path) {
            FileClass::Data => {
                self.0.posix.delete(&local_cache_path(logical_path)).await?;
                if let Some(cloud) = &self.0.cloud {
                    let remote_name = cloud.coordinator.remap(logical_path);
                    cloud.deferred_delete.enqueue(cloud.coordinator.destination(), &remote_name);
                    self.0.metrics.deferred_deletes_issued.inc();
                }
                Ok(())
            }
            FileClass::Log => self.append_wal_record(logical_path, WalOp::Delete, Vec::new()).await,
            FileClass::Other => self.0.posix.delete(logical_path).await,
        }
    }

    /// Renaming a data or log file is not supported (spec.md §4.4, §9
    /// Open Question #1): these names are tied to the engine's sequence
    /// numbering and to WAL record identity, and silently copy+deleting
    /// would break both.
    pub async fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        if classify(from) != FileClass::Other || classify(to) != FileClass::Other {
            return Err(Error::NotSupported("rename of a data or log file"));
        }
        self.0.posix.rename(from, to).await
    }

    /// Union of the remote listing (names with any epoch prefix stripped)
    /// and local entries that are not themselves data files, so a stray
    /// local `.sst` cannot masquerade as live (spec.md §4.4 invariant P7).
    /// This crate's own bookkeeping directories never appear here.
    pub async fn list_children(&self, dir: &str) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = BTreeSet::new();

        if let Some(cloud) = &self.0.cloud {
            let mut marker = None;
            loop {
                let page = cloud.object_store.list(cloud.coordinator.source(), dir, marker.as_deref()).await?;
                for key in &page.keys {
                    let name = key.rsplit('/').next().unwrap_or(key);
                    names.insert(strip_epoch(name).to_string());
                }
                match page.next_marker {
                    Some(next) => marker = Some(next),
                    None => break,
                }
            }
        }

        for name in self.0.posix.list_children(dir).await? {
            if classify(&name) != FileClass::Data && !INTERNAL_DIRS.contains(&name.as_str()) {
                names.insert(name);
            }
        }

        Ok(names.into_iter().collect())
    }

    pub async fn mkdir_all(&self, dir: &str) -> Result<()> {
        self.0.posix.mkdir_all(dir).await
    }

    /// A no-op: every write already reaches stable storage by the time
    /// `close()` on the writable file returns (local `sync_all` for
    /// `Other`, an object-store `put` for `Data`, a stream `append` for
    /// `Log`). Kept as a named operation for engines that call it
    /// unconditionally (spec.md §9 capability set).
    pub async fn fsync(&self, _logical_path: &str) -> Result<()> {
        Ok(())
    }

    /// Single-process advisory locking is not meaningful here: ownership
    /// of a prefix is arbitrated by the cloud-manifest pointer, not a
    /// local lock file (spec.md §4.5). Both calls succeed unconditionally
    /// so engines that always acquire a `LOCK` file keep working.
    pub async fn lock_file(&self, _logical_path: &str) -> Result<()> {
        Ok(())
    }

    pub async fn unlock_file(&self, _logical_path: &str) -> Result<()> {
        Ok(())
    }

    fn require_cloud(&self, logical_path: &str) -> Result<&CloudHandles> {
        self.0
            .cloud
            .as_ref()
            .ok_or_else(|| Error::NotFound(logical_path.to_string()))
    }

    /// Find the on-disk key for a data file this process did not create in
    /// its own currently-loaded epoch. `remap` alone only reproduces a key
    /// this process itself just wrote (spec.md §4.5's formula is stated
    /// from the writer's own point of view); a file inherited from an
    /// earlier owner (step 6: "old owners' ... data files are invisible [to
    /// the pointer] but not deleted") still carries THAT owner's epoch
    /// prefix, which this process never minted and so can't reconstruct by
    /// formula. Try the fast path first, then fall back to a prefix scan
    /// for any key whose stripped name matches (spec.md P2's isolation
    /// only promises no collision between *concurrent* writers; a later,
    /// sequential owner is expected to keep seeing earlier live files).
    async fn resolve_data_key(&self, cloud: &CloudHandles, logical_path: &str) -> Result<String> {
        let remapped = cloud.coordinator.remap(logical_path);
        if cloud.object_store.exists(cloud.coordinator.source(), &remapped).await? {
            return Ok(remapped);
        }

        let bare = strip_epoch(logical_path);
        let mut marker = None;
        loop {
            let page = cloud.object_store.list(cloud.coordinator.source(), "", marker.as_deref()).await?;
            for key in &page.keys {
                let name = key.rsplit('/').next().unwrap_or(key);
                // `list` returns full store-relative keys (prefix folded
                // in); `get`/`head` re-join a bare key onto the prefix
                // themselves, so only the trailing name is returned here.
                if strip_epoch(name) == bare {
                    return Ok(name.to_string());
                }
            }
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Err(Error::NotFound(logical_path.to_string()))
    }

    fn check_tailer_health(&self) -> Result<()> {
        if let Some(cloud) = &self.0.cloud {
            if let Some(tailer) = &cloud.tailer {
                if let TailerHealth::Unhealthy(msg) = tailer.health() {
                    return Err(Error::Internal(format!("log tailer unhealthy: {msg}")));
                }
            }
        }
        Ok(())
    }

    async fn append_wal_record(&self, logical_path: &str, op: WalOp, payload: Vec<u8>) -> Result<()> {
        let cloud = self.require_cloud(logical_path)?;
        let Some(stream) = &cloud.stream else {
            return Err(Error::NotSupported("no log stream configured"));
        };
        let stream_name = cloud
            .stream_name
            .as_deref()
            .ok_or(Error::Internal("stream name missing".into()))?;
        let epoch = cloud.coordinator.epoch_prefix().unwrap_or_default();
        let record = crate::stream_client::WalRecord {
            op,
            path: logical_path.to_string(),
            payload,
            epoch,
        };
        stream.append(stream_name, &record).await?;
        Ok(())
    }

    async fn append_log_locally_and_remotely(&self, logical_path: &str, data: &[u8]) -> Result<()> {
        self.0.posix.append_file(&local_cache_path(logical_path), data).await?;
        if self.0.cloud.is_some() {
            self.append_wal_record(logical_path, WalOp::Append, data.to_vec()).await?;
        }
        Ok(())
    }

    /// Upload the finished local cache copy of a data file to the
    /// destination under its remapped name, then drop the local copy
    /// unless `keep_local_sst` says to retain it (spec.md §6, §4.4).
    async fn finalize_data_file(&self, logical_path: &str, local_path: &str) -> Result<()> {
        let Some(cloud) = &self.0.cloud else { return Ok(()) };
        let bytes = self.0.posix.read_file(local_path).await?;
        let remote_name = cloud.coordinator.remap(logical_path);
        cloud
            .object_store
            .put(cloud.coordinator.destination(), &remote_name, Bytes::from(bytes))
            .await?;
        // A delete enqueued under this same name (a re-created file racing
        // its own deferred deletion, spec.md invariant P6) must be
        // cancelled now that the name is live again.
        if cloud.deferred_delete.cancel(cloud.coordinator.destination(), &remote_name) {
            self.0.metrics.deferred_deletes_cancelled.inc();
        }
        if !self.0.options.keep_local_sst {
            self.0.posix.delete(local_path).await?;
        }
        Ok(())
    }
}

fn spawn_tailer(
    stream: &Option<Arc<StreamClient>>,
    stream_name: &Option<String>,
    object_store: &Arc<ObjectStoreClient>,
    checkpoint_prefix: &BucketPrefix,
    instance_id: &str,
    options: &CloudEnvOptions,
    running: &Arc<AtomicBool>,
    metrics: &Arc<CloudEnvMetrics>,
) -> Option<Arc<LogTailer>> {
    let (stream, name) = match (stream, stream_name) {
        (Some(stream), Some(name)) => (stream, name),
        _ => return None,
    };
    let tailer = Arc::new(LogTailer::new(
        stream.clone(),
        object_store.clone(),
        Arc::new(PosixEnv::new(options.local_cache_dir.clone())),
        checkpoint_prefix.clone(),
        name.clone(),
        DEFAULT_SHARD.to_string(),
        instance_id.to_string(),
        metrics.clone(),
    ));
    tokio::spawn(tailer.clone().run(running.clone()));
    Some(tailer)
}

/// A handle returned by [`VirtualEnv::new_writable_file`]. Drop without
/// `close()` only logs a warning: there is no way to surface an error from
/// `Drop`, so engines are expected to always close explicitly (spec.md
/// §4.4).
pub struct WritableFile {
    class: FileClass,
    logical_path: String,
    local_path: String,
    env: VirtualEnv,
    closed: bool,
}

impl WritableFile {
    pub fn path(&self) -> &str {
        &self.logical_path
    }

    pub async fn append(&mut self, data: &[u8]) -> Result<()> {
        match self.class {
            FileClass::Log => self.env.append_log_locally_and_remotely(&self.logical_path, data).await,
            FileClass::Data | FileClass::Other => self.env.0.posix.append_file(&self.local_path, data).await,
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        match self.class {
            FileClass::Data => self.env.finalize_data_file(&self.logical_path, &self.local_path).await,
            FileClass::Log => self.env.append_wal_record(&self.logical_path, WalOp::Close, Vec::new()).await,
            FileClass::Other => Ok(()),
        }
    }
}

impl Drop for WritableFile {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(path = %self.logical_path, "writable file dropped without close()");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManifestEpochStrategy;
    use crate::stream_client::testing::InMemoryStreamBackend;
    use object_store::memory::InMemory;

    fn test_options(dir: &std::path::Path, src: Option<BucketPrefix>, dst: Option<BucketPrefix>) -> CloudEnvOptions {
        let mut options = CloudEnvOptions::local_only(dir);
        options.src = src;
        options.dst = dst;
        options.manifest_epoch_strategy = ManifestEpochStrategy::MonotonicCounter;
        options.file_deletion_delay = std::time::Duration::from_secs(3600);
        options
    }

    #[tokio::test]
    async fn local_only_round_trips_every_file_class() {
        let dir = tempfile::tempdir().unwrap();
        let env = VirtualEnv::local_only(CloudEnvOptions::local_only(dir.path()));

        for path in ["7.sst", "3.log", "IDENTITY"] {
            let mut file = env.new_writable_file(path).await.unwrap();
            file.append(b"hello ").await.unwrap();
            file.append(b"world").await.unwrap();
            file.close().await.unwrap();

            assert!(env.file_exists(path).await.unwrap());
            assert_eq!(env.get_size(path).await.unwrap(), 11);
            let got = env.read_range(path, 0, 11).await.unwrap();
            assert_eq!(got, Bytes::from_static(b"hello world"));
        }
    }

    #[tokio::test]
    async fn rename_is_rejected_for_data_and_log_but_allowed_for_other() {
        let dir = tempfile::tempdir().unwrap();
        let env = VirtualEnv::local_only(CloudEnvOptions::local_only(dir.path()));

        env.new_writable_file("1.sst").await.unwrap().close().await.unwrap();
        let err = env.rename_file("1.sst", "2.sst").await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));

        env.new_writable_file("CURRENT").await.unwrap().close().await.unwrap();
        env.rename_file("CURRENT", "CURRENT.bak").await.unwrap();
        assert!(env.file_exists("CURRENT.bak").await.unwrap());
    }

    #[tokio::test]
    async fn p7_list_children_hides_a_stray_local_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let env = VirtualEnv::local_only(CloudEnvOptions::local_only(dir.path()));

        // A stray data file landing directly in the working directory
        // (not under the internal cache/ dir) must not appear as live.
        tokio::fs::write(dir.path().join("99.sst"), b"stray").await.unwrap();
        env.new_writable_file("IDENTITY").await.unwrap().close().await.unwrap();

        let children = env.list_children("").await.unwrap();
        assert!(children.contains(&"IDENTITY".to_string()));
        assert!(!children.contains(&"99.sst".to_string()));
    }

    #[tokio::test]
    async fn data_file_uploads_to_destination_and_is_readable_remotely_after_local_delete() {
        let dir = tempfile::tempdir().unwrap();
        let object_store = Arc::new(ObjectStoreClient::from_store(Arc::new(InMemory::new()), 50));
        let prefix = BucketPrefix::new("bucket", "db");
        let mut options = test_options(dir.path(), Some(prefix.clone()), Some(prefix.clone()));
        options.keep_local_sst = false;

        let (env, _writer_open) = VirtualEnv::open_as_writer(options, object_store, None, None, "MANIFEST-1", None)
            .await
            .unwrap();

        let mut file = env.new_writable_file("7.sst").await.unwrap();
        file.append(b"sst-bytes").await.unwrap();
        file.close().await.unwrap();

        // Local cache copy is gone (keep_local_sst = false)...
        assert!(!env.0.posix.exists(&local_cache_path("7.sst")).await);
        // ...but the file is still readable, now served from the object store.
        assert!(env.file_exists("7.sst").await.unwrap());
        let got = env.read_range("7.sst", 0, 9).await.unwrap();
        assert_eq!(got, Bytes::from_static(b"sst-bytes"));

        env.shutdown();
    }

    #[tokio::test]
    async fn log_writes_reach_the_stream_and_the_local_cache() {
        let dir = tempfile::tempdir().unwrap();
        let object_store = Arc::new(ObjectStoreClient::from_store(Arc::new(InMemory::new()), 50));
        let backend = InMemoryStreamBackend::new();
        backend.create_stream("wal", 1).await.unwrap();
        let stream = Arc::new(StreamClient::new(backend, std::time::Duration::from_secs(1)));

        let prefix = BucketPrefix::new("bucket", "db");
        let options = test_options(dir.path(), Some(prefix.clone()), Some(prefix));

        let (env, _writer_open) = VirtualEnv::open_as_writer(
            options,
            object_store,
            Some(stream.clone()),
            Some("wal".to_string()),
            "MANIFEST-1",
            Some("db-identity"),
        )
        .await
        .unwrap();

        let mut file = env.new_writable_file("4.log").await.unwrap();
        file.append(b"record-one").await.unwrap();
        file.close().await.unwrap();

        let got = env.read_range("4.log", 0, 10).await.unwrap();
        assert_eq!(got, Bytes::from_static(b"record-one"));

        let records = stream
            .read("wal", "shard-0", &crate::stream_client::ReadFrom::Oldest)
            .await
            .unwrap();
        assert_eq!(records.len(), 2); // Append, then Close
        assert_eq!(records[0].record.op, WalOp::Append);
        assert_eq!(records[1].record.op, WalOp::Close);

        env.shutdown();
    }

    #[tokio::test]
    async fn writer_without_a_destination_must_use_local_only() {
        let dir = tempfile::tempdir().unwrap();
        let object_store = Arc::new(ObjectStoreClient::from_store(Arc::new(InMemory::new()), 50));
        let options = test_options(dir.path(), None, None);
        let err = VirtualEnv::open_as_writer(options, object_store, None, None, "MANIFEST-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Permanent { .. }));
    }

    /// P2/scenario "TwoWritersRace": a file created under an earlier
    /// owner's epoch is still readable by a later owner that never minted
    /// that epoch itself, once its own local cache copy is gone.
    #[tokio::test]
    async fn p2_a_later_owner_still_resolves_an_earlier_owners_data_file() {
        let object_store = Arc::new(ObjectStoreClient::from_store(Arc::new(InMemory::new()), 50));
        let prefix = BucketPrefix::new("bucket", "db");

        let dir1 = tempfile::tempdir().unwrap();
        let mut options1 = test_options(dir1.path(), Some(prefix.clone()), Some(prefix.clone()));
        options1.keep_local_sst = false;
        let (writer1, _) = VirtualEnv::open_as_writer(options1, object_store.clone(), None, None, "MANIFEST-1", None)
            .await
            .unwrap();
        write_data_file(&writer1, "0.sst", b"from-writer-one").await;
        writer1.shutdown();

        let dir2 = tempfile::tempdir().unwrap();
        let options2 = test_options(dir2.path(), Some(prefix.clone()), Some(prefix));
        let (writer2, _) = VirtualEnv::open_as_writer(options2, object_store, None, None, "MANIFEST-1", None)
            .await
            .unwrap();

        // writer2 minted its own (later) epoch and never wrote "0.sst"
        // itself, yet it must still resolve and read writer1's file.
        assert!(writer2.file_exists("0.sst").await.unwrap());
        let got = writer2.read_whole("0.sst").await.unwrap();
        assert_eq!(got, Bytes::from_static(b"from-writer-one"));

        writer2.shutdown();
    }

    async fn write_data_file(env: &VirtualEnv, name: &str, contents: &[u8]) {
        let mut file = env.new_writable_file(name).await.unwrap();
        file.append(contents).await.unwrap();
        file.close().await.unwrap();
    }
}
