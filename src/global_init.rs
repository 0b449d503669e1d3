//! Process-lifetime resource (spec.md §9 "Global state"): the object-store
//! SDK may require process-wide init/teardown. Modeled as a ref-counted
//! guard acquired on first environment construction and released after the
//! last is dropped, rather than a bare global `static`, so there is no
//! back-edge from the SDK's lifetime management into any one environment.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static LIVE_ENVIRONMENTS: AtomicUsize = AtomicUsize::new(0);

/// Held by every `VirtualEnv`. The process-wide resource is acquired when
/// the first guard is created and released when the last is dropped.
pub struct GlobalInitGuard {
    _private: (),
}

impl GlobalInitGuard {
    pub fn acquire() -> Arc<GlobalInitGuard> {
        if LIVE_ENVIRONMENTS.fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::debug!("acquiring process-wide object-store/stream SDK resources");
        }
        Arc::new(GlobalInitGuard { _private: () })
    }
}

impl Drop for GlobalInitGuard {
    fn drop(&mut self) {
        if LIVE_ENVIRONMENTS.fetch_sub(1, Ordering::SeqCst) == 1 {
            tracing::debug!("releasing process-wide object-store/stream SDK resources");
        }
    }
}
