//! Epoch minting (spec.md §3 "Epoch", §4.5, §6).

use crate::config::ManifestEpochStrategy;
use std::sync::atomic::{AtomicU64, Ordering};

static MONOTONIC_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A monotonic identifier minted per open-as-writer, embedded in every WAL
/// record and every new engine-manifest name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(String);

impl Epoch {
    pub fn mint(strategy: ManifestEpochStrategy) -> Epoch {
        match strategy {
            ManifestEpochStrategy::NanosWithRandom => {
                let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
                let suffix: u32 = rand::random();
                Epoch(format!("{nanos}-{suffix:08x}"))
            }
            ManifestEpochStrategy::MonotonicCounter => {
                let n = MONOTONIC_COUNTER.fetch_add(1, Ordering::SeqCst);
                Epoch(format!("{n:020}"))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prepend this epoch onto an engine-manifest base name, e.g.
    /// `MANIFEST-7` -> `<epoch>.MANIFEST-7` (spec.md §4.5 step 4).
    pub fn prefix_name(&self, base_name: &str) -> String {
        format!("{}.{}", self.0, base_name)
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
