//! Object-store client adapter (spec.md §4.2).
//!
//! A thin façade over `object_store`'s `dyn ObjectStore`, grounded on
//! `iota-data-ingestion-core/src/util.rs`'s `create_remote_store_client_with_ops`
//! (building an `AmazonS3Builder` from a url plus config keys) and on
//! `sui-analytics-indexer/tests/mock_store.rs` (the full adapter method
//! list, and `object_store::Error::Generic` construction for synthetic
//! failures). Every method here translates `object_store::Error` into this
//! crate's `Error` kinds at the boundary (spec.md §7): no `object_store`
//! error type escapes.

use crate::config::{BucketPrefix, Credentials, SseOptions};
use crate::error::{Error, Result};
use crate::metrics::CloudEnvMetrics;
use crate::retry::RetryBudget;
use bytes::Bytes;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, ObjectMeta, ObjectStore, PutPayload};
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// `head`'s return value (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub size: usize,
    pub mtime: chrono::DateTime<chrono::Utc>,
}

/// One page of a `list` call (spec.md §4.2: "iterated until `next-marker`
/// is empty").
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_marker: Option<String>,
}

pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
    retry_budget: Duration,
    list_page_size: usize,
    sse: SseOptions,
    metrics: Arc<CloudEnvMetrics>,
}

impl ObjectStoreClient {
    /// Build a client targeting `region`, authenticating via `credentials`
    /// when non-empty, falling back to the ambient AWS provider chain
    /// otherwise (spec.md §6).
    pub fn new_s3(
        region: &str,
        credentials: &Credentials,
        sse: SseOptions,
        retry_budget: Duration,
        list_page_size: usize,
    ) -> Result<Self> {
        let mut builder = AmazonS3Builder::new().with_region(region);

        if !credentials.is_empty() {
            if let Some(access_key) = &credentials.access_key {
                builder = builder.with_config(AmazonS3ConfigKey::AccessKeyId, access_key);
            }
            if let Some(secret_key) = &credentials.secret_key {
                builder = builder.with_config(AmazonS3ConfigKey::SecretAccessKey, secret_key);
            }
        }

        if sse.enabled {
            builder = builder.with_config(AmazonS3ConfigKey::ServerSideEncryption, "aws:kms");
            if let Some(key_id) = &sse.encryption_key_id {
                builder = builder.with_config(AmazonS3ConfigKey::SseKmsKeyId, key_id);
            }
        }

        let store = builder
            .build()
            .map_err(|e| Error::permanent("object_store::build", e))?;

        Ok(ObjectStoreClient {
            store: Arc::new(store),
            retry_budget,
            list_page_size,
            sse,
            metrics: Arc::new(CloudEnvMetrics::new_unregistered()),
        })
    }

    /// Construct directly from an already-built store, e.g. an in-memory
    /// store for tests.
    pub fn from_store(store: Arc<dyn ObjectStore>, list_page_size: usize) -> Self {
        ObjectStoreClient {
            store,
            retry_budget: Duration::from_secs(10),
            list_page_size,
            sse: SseOptions::default(),
            metrics: Arc::new(CloudEnvMetrics::new_unregistered()),
        }
    }

    /// Share an existing metrics registry instead of this client's own
    /// private, unregistered one (SPEC_FULL.md §B.4).
    pub fn with_metrics(mut self, metrics: Arc<CloudEnvMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<CloudEnvMetrics> {
        &self.metrics
    }

    fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.retry_budget)
    }

    fn object_path(prefix: &BucketPrefix, key: &str) -> ObjectPath {
        ObjectPath::from(prefix.key(key))
    }

    pub async fn put(&self, prefix: &BucketPrefix, key: &str, bytes: Bytes) -> Result<()> {
        self.metrics.object_store_calls.with_label_values(&["put"]).inc();
        let path = Self::object_path(prefix, key);
        self.budget()
            .retry_instrumented("put", &self.metrics.object_store_retries, || {
                let path = path.clone();
                let bytes = bytes.clone();
                let store = self.store.clone();
                async move {
                    store
                        .put(&path, PutPayload::from(bytes))
                        .await
                        .map(|_| ())
                        .map_err(Error::from)
                }
            })
            .await
    }

    /// `offset=0, len=0` is the approved existence/size probe: `list` is
    /// eventually consistent and must not be used for existence checks
    /// (spec.md §4.2).
    pub async fn get(
        &self,
        prefix: &BucketPrefix,
        key: &str,
        offset: usize,
        len: usize,
    ) -> Result<Bytes> {
        self.metrics.object_store_calls.with_label_values(&["get"]).inc();
        let path = Self::object_path(prefix, key);
        self.budget()
            .retry_instrumented("get", &self.metrics.object_store_retries, || {
                let path = path.clone();
                let store = self.store.clone();
                async move {
                    if len == 0 && offset == 0 {
                        let opts = GetOptions {
                            range: Some(GetRange::Bounded(0..0)),
                            ..Default::default()
                        };
                        store.get_opts(&path, opts).await.map_err(Error::from)?;
                        Ok(Bytes::new())
                    } else {
                        let range: Range<u64> = offset as u64..(offset + len) as u64;
                        store
                            .get_range(&path, range)
                            .await
                            .map_err(Error::from)
                    }
                }
            })
            .await
    }

    /// Existence probe via a zero-length `get` (spec.md §4.2, §9). Prefer
    /// `head` when the backing store offers a strongly-consistent HEAD
    /// (DESIGN.md Open Question #3).
    pub async fn exists(&self, prefix: &BucketPrefix, key: &str) -> Result<bool> {
        match self.get(prefix, key, 0, 0).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Read an entire small object (a pointer, a dbid record, a
    /// checkpoint). Prefer `get` with an explicit range for data files,
    /// which may be large.
    pub async fn get_whole(&self, prefix: &BucketPrefix, key: &str) -> Result<Bytes> {
        self.metrics.object_store_calls.with_label_values(&["get_whole"]).inc();
        let path = Self::object_path(prefix, key);
        self.budget()
            .retry_instrumented("get_whole", &self.metrics.object_store_retries, || {
                let path = path.clone();
                let store = self.store.clone();
                async move {
                    let result = store.get(&path).await.map_err(Error::from)?;
                    result.bytes().await.map_err(Error::from)
                }
            })
            .await
    }

    pub async fn head(&self, prefix: &BucketPrefix, key: &str) -> Result<ObjectHead> {
        self.metrics.object_store_calls.with_label_values(&["head"]).inc();
        let path = Self::object_path(prefix, key);
        let meta: ObjectMeta = self
            .budget()
            .retry_instrumented("head", &self.metrics.object_store_retries, || {
                let path = path.clone();
                let store = self.store.clone();
                async move { store.head(&path).await.map_err(Error::from) }
            })
            .await?;
        Ok(ObjectHead {
            size: meta.size as usize,
            mtime: meta.last_modified,
        })
    }

    pub async fn list(
        &self,
        prefix: &BucketPrefix,
        sub_prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListPage> {
        self.metrics.object_store_calls.with_label_values(&["list"]).inc();
        let full_prefix = ObjectPath::from(prefix.key(sub_prefix));
        let store = self.store.clone();
        let mut stream = match marker {
            Some(marker) => store.list_with_offset(Some(&full_prefix), &ObjectPath::from(marker)),
            None => store.list(Some(&full_prefix)),
        };

        use futures::StreamExt;
        let mut keys = Vec::with_capacity(self.list_page_size);
        let mut next_marker = None;
        while let Some(item) = stream.next().await {
            let meta = item.map_err(Error::from)?;
            keys.push(meta.location.to_string());
            if keys.len() == self.list_page_size {
                // `list_with_offset`'s offset is exclusive, so the next page
                // must resume from the last key we actually returned here.
                next_marker = keys.last().cloned();
                break;
            }
        }
        Ok(ListPage { keys, next_marker })
    }

    /// Idempotent: `NotFound` is treated as success (spec.md §4.2).
    pub async fn delete(&self, prefix: &BucketPrefix, key: &str) -> Result<()> {
        self.metrics.object_store_calls.with_label_values(&["delete"]).inc();
        let path = Self::object_path(prefix, key);
        match self
            .budget()
            .retry_instrumented("delete", &self.metrics.object_store_retries, || {
                let path = path.clone();
                let store = self.store.clone();
                async move { store.delete(&path).await.map_err(Error::from) }
            })
            .await
        {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn copy(
        &self,
        src_prefix: &BucketPrefix,
        src_key: &str,
        dst_prefix: &BucketPrefix,
        dst_key: &str,
    ) -> Result<()> {
        self.metrics.object_store_calls.with_label_values(&["copy"]).inc();
        let from = Self::object_path(src_prefix, src_key);
        let to = Self::object_path(dst_prefix, dst_key);
        self.budget()
            .retry_instrumented("copy", &self.metrics.object_store_retries, || {
                let from = from.clone();
                let to = to.clone();
                let store = self.store.clone();
                async move { store.copy(&from, &to).await.map_err(Error::from) }
            })
            .await
    }

    /// Idempotent. Many S3-compatible backends auto-provision the bucket
    /// namespace; this is a no-op placeholder for those where it is not,
    /// matching spec.md §4.2's "create-bucket(prefix) — idempotent."
    pub async fn create_bucket(&self, _prefix: &BucketPrefix) -> Result<()> {
        Ok(())
    }

    pub fn sse(&self) -> &SseOptions {
        &self.sse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn client() -> ObjectStoreClient {
        ObjectStoreClient::from_store(Arc::new(InMemory::new()), 50)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let c = client();
        let prefix = BucketPrefix::new("bucket", "db");
        c.put(&prefix, "42.sst", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let got = c.get(&prefix, "42.sst", 0, 5).await.unwrap();
        assert_eq!(got, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn get_range_returns_exact_slice() {
        let c = client();
        let prefix = BucketPrefix::new("bucket", "db");
        c.put(&prefix, "42.sst", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        let got = c.get(&prefix, "42.sst", 2, 3).await.unwrap();
        assert_eq!(got, Bytes::from_static(b"234"));
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let c = client();
        let prefix = BucketPrefix::new("bucket", "db");
        let err = c.get(&prefix, "missing.sst", 0, 1).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn exists_probe_does_not_read_content() {
        let c = client();
        let prefix = BucketPrefix::new("bucket", "db");
        assert!(!c.exists(&prefix, "42.sst").await.unwrap());
        c.put(&prefix, "42.sst", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(c.exists(&prefix, "42.sst").await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let c = client();
        let prefix = BucketPrefix::new("bucket", "db");
        c.delete(&prefix, "missing.sst").await.unwrap();
        c.put(&prefix, "42.sst", Bytes::from_static(b"x"))
            .await
            .unwrap();
        c.delete(&prefix, "42.sst").await.unwrap();
        c.delete(&prefix, "42.sst").await.unwrap();
        assert!(!c.exists(&prefix, "42.sst").await.unwrap());
    }

    #[tokio::test]
    async fn copy_duplicates_content_under_new_key() {
        let c = client();
        let src = BucketPrefix::new("bucket", "src");
        let dst = BucketPrefix::new("bucket", "dst");
        c.put(&src, "42.sst", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        c.copy(&src, "42.sst", &dst, "42.sst").await.unwrap();
        let got = c.get(&dst, "42.sst", 0, 7).await.unwrap();
        assert_eq!(got, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn list_hides_nothing_it_does_not_own() {
        let c = client();
        let prefix = BucketPrefix::new("bucket", "db");
        c.put(&prefix, "1.sst", Bytes::from_static(b"a"))
            .await
            .unwrap();
        c.put(&prefix, "2.sst", Bytes::from_static(b"b"))
            .await
            .unwrap();
        let page = c.list(&prefix, "", None).await.unwrap();
        assert_eq!(page.keys.len(), 2);
        assert!(page.next_marker.is_none());
    }

    #[tokio::test]
    async fn list_pages_past_the_page_size_boundary_without_dropping_keys() {
        let c = ObjectStoreClient::from_store(Arc::new(InMemory::new()), 50);
        let prefix = BucketPrefix::new("bucket", "db");
        for n in 0..120 {
            c.put(&prefix, &format!("{n:04}.sst"), Bytes::from_static(b"x"))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut marker = None;
        loop {
            let page = c.list(&prefix, "", marker.as_deref()).await.unwrap();
            seen.extend(page.keys);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 120, "every object must be returned exactly once across pages");
    }

    #[tokio::test]
    async fn get_whole_reads_entire_object() {
        let c = client();
        let prefix = BucketPrefix::new("bucket", "db");
        c.put(&prefix, "CLOUDMANIFEST", Bytes::from_static(b"MANIFEST-1-7"))
            .await
            .unwrap();
        let got = c.get_whole(&prefix, "CLOUDMANIFEST").await.unwrap();
        assert_eq!(got, Bytes::from_static(b"MANIFEST-1-7"));
    }

    #[tokio::test]
    async fn calls_are_recorded_per_operation() {
        let c = client();
        let prefix = BucketPrefix::new("bucket", "db");
        c.put(&prefix, "42.sst", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        c.get(&prefix, "42.sst", 0, 5).await.unwrap();
        assert_eq!(c.metrics().object_store_calls.with_label_values(&["put"]).get(), 1.0);
        assert_eq!(c.metrics().object_store_calls.with_label_values(&["get"]).get(), 1.0);
    }

    #[test]
    fn head_str_from_str_config_key_parses() {
        // Sanity-checks that the config-key strings we construct from
        // `SseOptions` are ones `AmazonS3ConfigKey` actually recognises.
        assert!(AmazonS3ConfigKey::from_str("aws_server_side_encryption").is_ok());
    }
}
