//! Ambient metrics (SPEC_FULL.md §B.4). Optional: an environment can be
//! constructed without a registry, in which case a fresh, unregistered
//! set of counters is used and simply never scraped.

use prometheus::{Counter, CounterVec, Gauge, Opts, Registry};

pub struct CloudEnvMetrics {
    pub object_store_calls: CounterVec,
    pub object_store_retries: CounterVec,
    pub tailer_seqno_lag: Gauge,
    pub deferred_deletes_issued: Counter,
    pub deferred_deletes_cancelled: Counter,
}

impl CloudEnvMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let object_store_calls = CounterVec::new(
            Opts::new("cloud_store_object_calls_total", "object-store adapter calls by operation"),
            &["op"],
        )?;
        let object_store_retries = CounterVec::new(
            Opts::new(
                "cloud_store_object_retries_total",
                "object-store adapter retries by operation",
            ),
            &["op"],
        )?;
        let tailer_seqno_lag = Gauge::new(
            "cloud_store_tailer_seqno_lag",
            "best-effort lag between the stream tail and the tailer's materialized seqno",
        )?;
        let deferred_deletes_issued = Counter::new(
            "cloud_store_deferred_deletes_issued_total",
            "deferred deletes actually issued to the object store",
        )?;
        let deferred_deletes_cancelled = Counter::new(
            "cloud_store_deferred_deletes_cancelled_total",
            "deferred deletes cancelled because the key was re-created in time",
        )?;

        registry.register(Box::new(object_store_calls.clone()))?;
        registry.register(Box::new(object_store_retries.clone()))?;
        registry.register(Box::new(tailer_seqno_lag.clone()))?;
        registry.register(Box::new(deferred_deletes_issued.clone()))?;
        registry.register(Box::new(deferred_deletes_cancelled.clone()))?;

        Ok(CloudEnvMetrics {
            object_store_calls,
            object_store_retries,
            tailer_seqno_lag,
            deferred_deletes_issued,
            deferred_deletes_cancelled,
        })
    }

    /// A metrics set with a private, never-scraped registry, for tests and
    /// for callers that don't want to wire up Prometheus.
    pub fn new_unregistered() -> Self {
        Self::new(&Registry::new()).expect("metric names are static and valid")
    }
}
