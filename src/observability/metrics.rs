use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Prometheus-facing metrics for the idempotency coordinator and its stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    /// `outcome` is one of `executed`, `cached`, `failed`, `lock_exhausted`, `invalid_key`.
    pub fn record_execution(&self, outcome: &'static str) {
        counter!("idempotency_executions_total", "outcome" => outcome).increment(1);
    }

    pub fn record_lock_attempt(&self, acquired: bool) {
        counter!("idempotency_lock_attempts_total", "acquired" => acquired.to_string()).increment(1);
    }

    pub fn record_lock_wait_latency(&self, duration_ms: f64) {
        histogram!("idempotency_lock_wait_duration_ms").record(duration_ms);
    }

    pub fn record_operation_latency(&self, duration_ms: f64, success: bool) {
        histogram!("idempotency_operation_duration_ms", "success" => success.to_string()).record(duration_ms);
    }

    pub fn record_lock_release_failure(&self) {
        counter!("idempotency_lock_release_failures_total").increment(1);
    }

    pub fn record_store_operation(&self, backend: &'static str, operation: &'static str, duration_ms: f64, success: bool) {
        counter!("idempotency_store_operations_total", "backend" => backend, "operation" => operation, "success" => success.to_string()).increment(1);
        histogram!("idempotency_store_operation_duration_ms", "backend" => backend, "operation" => operation).record(duration_ms);
    }

    pub fn record_cleanup(&self, purged: u64) {
        counter!("idempotency_cleanup_purged_total").increment(purged);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("idempotency_executions_total", Unit::Count, "Execute calls by outcome");
    describe_counter!("idempotency_lock_attempts_total", Unit::Count, "Per-key lock attempts");
    describe_histogram!("idempotency_lock_wait_duration_ms", Unit::Milliseconds, "Time spent acquiring the per-key lock");
    describe_histogram!("idempotency_operation_duration_ms", Unit::Milliseconds, "Caller operation latency in milliseconds");
    describe_counter!("idempotency_lock_release_failures_total", Unit::Count, "Lock releases that failed during cleanup");

    describe_counter!("idempotency_store_operations_total", Unit::Count, "Total store backend operations");
    describe_histogram!("idempotency_store_operation_duration_ms", Unit::Milliseconds, "Store backend latency in milliseconds");

    describe_counter!("idempotency_cleanup_purged_total", Unit::Count, "Entries removed by the cleanup job");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer() {
        let timer = LatencyTimer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_ms();
        assert!(elapsed >= 10.0);
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = get_metrics();
        metrics.record_execution("executed");
        metrics.record_lock_attempt(false);
        metrics.record_store_operation("memory", "exists", 0.1, true);
    }
}
