use std::fmt::{self, Debug};
use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder, exponential_buckets,
};

use crate::error::Error;

pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    reconcile_errors: IntCounterVec,
    reconcile_duration: Histogram,
    retries: IntCounter,
    dropped: IntCounter,
    queue_depth: IntGauge,
    watch_events: IntCounter,
    watch_errors: IntCounter,
    cached_objects: IntGauge,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Metrics")
    }
}

const NAMESPACE: &str = "foo_operator";

impl Metrics {
    pub fn new() -> Result<Metrics, Error> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new("reconciles_total", "completed reconciles by outcome").namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;

        let reconcile_errors = IntCounterVec::new(
            Opts::new("reconcile_errors_total", "failed reconciles by error kind")
                .namespace(NAMESPACE),
            &["kind"],
        )?;
        registry.register(Box::new(reconcile_errors.clone()))?;

        // 5ms .. ~10s
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new("reconcile_duration_seconds", "time spent in a reconcile pass")
                .namespace(NAMESPACE)
                .buckets(exponential_buckets(0.005, 2.0, 12)?),
        )?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        let retries = IntCounter::with_opts(
            Opts::new("retries_total", "keys requeued with backoff").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(retries.clone()))?;

        let dropped = IntCounter::with_opts(
            Opts::new("dropped_total", "keys dropped after permanent or repeated failure")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(dropped.clone()))?;

        let queue_depth = IntGauge::with_opts(
            Opts::new("queue_depth", "keys waiting in the work queue").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let watch_events = IntCounter::with_opts(
            Opts::new("watch_events_total", "watch events received").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(watch_events.clone()))?;

        let watch_errors = IntCounter::with_opts(
            Opts::new("watch_errors_total", "watch stream errors").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(watch_errors.clone()))?;

        let cached_objects = IntGauge::with_opts(
            Opts::new("cached_objects", "Foo objects in the local cache").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(cached_objects.clone()))?;

        Ok(Metrics {
            registry,
            reconciles,
            reconcile_errors,
            reconcile_duration,
            retries,
            dropped,
            queue_depth,
            watch_events,
            watch_errors,
            cached_objects,
        })
    }

    pub fn reconciled(&self, outcome: &str, elapsed: Duration) {
        self.reconciles.with_label_values(&[outcome]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    pub fn reconcile_failed(&self, err: &Error, elapsed: Duration) {
        self.reconcile_errors.with_label_values(&[err.kind()]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    pub fn retried(&self) {
        self.retries.inc();
    }

    pub fn dropped(&self) {
        self.dropped.inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub fn watch_event(&self) {
        self.watch_events.inc();
    }

    pub fn watch_error(&self) {
        self.watch_errors.inc();
    }

    pub fn set_cached_objects(&self, count: usize) {
        self.cached_objects
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.get()
    }

    pub fn retry_count(&self) -> u64 {
        self.retries.get()
    }

    /// Renders every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
