use std::sync::Arc;

use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;

use crate::{apis::dittoserver_types::DittoServer, Error};

#[derive(Clone)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
    pub registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        let registry = Registry::new_custom(Some("dittofs_operator".to_owned()), None).expect("static metric namespace is valid");
        let reconcile = ReconcileMetrics::default().register(&registry);
        Self {
            registry: Arc::new(registry),
            reconcile,
        }
    }
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: IntCounter,
    pub failures: IntCounterVec,
    pub duration: HistogramVec,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: IntCounter::new("reconcile_runs", "reconciliations").expect("valid metric"),
            failures: IntCounterVec::new(
                opts!("reconcile_failures", "reconciliation errors"),
                &["instance", "error"],
            )
            .expect("valid metric"),
            duration: HistogramVec::new(
                histogram_opts!("reconcile_duration_seconds", "reconcile duration", vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
                &["instance"],
            )
            .expect("valid metric"),
        }
    }
}

impl ReconcileMetrics {
    pub fn register(self, registry: &Registry) -> Self {
        registry.register(Box::new(self.runs.clone())).expect("single registration");
        registry.register(Box::new(self.failures.clone())).expect("single registration");
        registry.register(Box::new(self.duration.clone())).expect("single registration");
        self
    }

    pub fn set_failure(&self, cr: &DittoServer, e: &Error) {
        self.failures.with_label_values(&[&cr.name_any(), &e.metric_label()]).inc();
    }

    pub fn count_and_measure(&self, cr: &DittoServer) -> ReconcileMeasurer {
        self.runs.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            instance: cr.name_any(),
            metric: self.duration.clone(),
        }
    }
}

/// Relies on `Drop` to calculate reconcile duration and record the
/// observation in the histogram once the pass's timer goes out of scope.
pub struct ReconcileMeasurer {
    start: Instant,
    instance: String,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[&self.instance]).observe(duration);
    }
}
