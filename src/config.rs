//! Configuration surface (spec.md §6).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Epoch minting strategy (spec.md §6, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ManifestEpochStrategy {
    /// Monotonic wall-clock nanoseconds, tie-broken by a random suffix.
    #[default]
    NanosWithRandom,
    /// A process-local monotonic counter. Useful in tests where wall-clock
    /// resolution is too coarse to guarantee distinct epochs.
    MonotonicCounter,
}

/// Server-side encryption configuration for uploads (spec.md §4.2, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SseOptions {
    pub enabled: bool,
    pub encryption_key_id: Option<String>,
}

/// Static credentials; when both fields are empty the ambient AWS provider
/// chain is used instead (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.access_key.is_none() && self.secret_key.is_none()
    }
}

/// A `(bucket, object-path-prefix)` pair naming a logical database location
/// (spec.md §3 "Prefix").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketPrefix {
    pub bucket: String,
    pub prefix: String,
}

impl BucketPrefix {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        BucketPrefix {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Join a key onto this prefix, e.g. `prefix.key("CLOUDMANIFEST")`.
    pub fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), name)
        }
    }
}

impl std::fmt::Display for BucketPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.prefix)
    }
}

fn default_true() -> bool {
    true
}

fn default_deletion_delay() -> Duration {
    Duration::from_secs(3600)
}

fn default_list_page_size() -> usize {
    50
}

fn default_retry_budget() -> Duration {
    Duration::from_secs(10)
}

/// Top-level configuration, mirroring spec.md §6's configuration table
/// field-for-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEnvOptions {
    /// Source location; required if reading remote state.
    pub src: Option<BucketPrefix>,
    /// Destination; if `None`, writes are local only.
    pub dst: Option<BucketPrefix>,
    pub region: String,
    #[serde(default)]
    pub credentials: Credentials,

    /// Retain the local cached copy of a data file after upload. Defaults
    /// to `true` when no destination bucket is configured.
    #[serde(default = "default_true")]
    pub keep_local_sst: bool,
    /// Retain tailed WAL segments locally.
    #[serde(default = "default_true")]
    pub keep_local_log: bool,

    #[serde(default)]
    pub server_side_encryption: SseOptions,

    /// Deferred-delete window (spec.md §4.8).
    #[serde(with = "humantime_serde", default = "default_deletion_delay")]
    pub file_deletion_delay: Duration,

    pub persistent_cache_path: Option<std::path::PathBuf>,
    pub persistent_cache_size_gb: Option<u64>,

    #[serde(default)]
    pub manifest_epoch_strategy: ManifestEpochStrategy,

    /// Object-store `list` page size (spec.md §5, §9: "adopt the spec
    /// value, allow override").
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Total retry budget for transient adapter errors (spec.md §4.2).
    #[serde(with = "humantime_serde", default = "default_retry_budget")]
    pub retry_budget: Duration,

    /// Local cache directory root (spec.md §3 "Local cache directory").
    pub local_cache_dir: std::path::PathBuf,
}

impl CloudEnvOptions {
    /// A config for local-only use: no destination bucket, keep-local
    /// defaults in effect (spec.md §4.4 policy note).
    pub fn local_only(local_cache_dir: impl Into<std::path::PathBuf>) -> Self {
        CloudEnvOptions {
            src: None,
            dst: None,
            region: "us-east-1".to_string(),
            credentials: Credentials::default(),
            keep_local_sst: true,
            keep_local_log: true,
            server_side_encryption: SseOptions::default(),
            file_deletion_delay: default_deletion_delay(),
            persistent_cache_path: None,
            persistent_cache_size_gb: None,
            manifest_epoch_strategy: ManifestEpochStrategy::default(),
            list_page_size: default_list_page_size(),
            retry_budget: default_retry_budget(),
            local_cache_dir: local_cache_dir.into(),
        }
    }
}
