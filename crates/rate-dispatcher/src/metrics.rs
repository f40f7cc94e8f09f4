//! The metrics sink (§4.5): a live, queryable object that aggregates queue
//! depth, wait-time samples, backoff events, and per-host retry deadlines.
//!
//! Readers may observe the sink concurrently with writers; individual field
//! reads are consistent but no cross-field snapshot is guaranteed, matching
//! the tolerance the specification explicitly allows. Internally this uses
//! one `Mutex`-guarded struct per host — the same coarse-locking approach
//! `tower-resilience-ratelimiter`'s window states use — rather than a
//! constellation of independent atomics, since several of these fields
//! (wait-time samples, the backoff log) aren't atomics-shaped anyway.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// An append-only audit record of one scheduled retry.
#[derive(Debug, Clone)]
pub struct BackoffEvent {
    pub host: String,
    pub attempt: u32,
    pub delay: Duration,
    pub retry_after_hint: Option<f64>,
    pub status: u16,
}

#[derive(Debug, Default)]
struct HostMetrics {
    total_enqueued: u64,
    completed: u64,
    backoff_events: u64,
    rate_limit_exceeded: u64,
    operation_errors: u64,
    cancelled: u64,
    queue_depth: i64,
    wait_times: Vec<f64>,
    retry_after: Option<Instant>,
    last_backoff_seconds: Option<f64>,
}

/// Aggregated observability state for the dispatcher.
///
/// Cheap to clone behind an `Arc` (see [`crate::Dispatcher::metrics`]); a
/// fresh sink is the default unless [`crate::DispatcherConfigBuilder::metrics_sink`]
/// supplies a shared one (e.g. to combine metrics across several dispatcher
/// instances).
#[derive(Debug, Default)]
pub struct MetricsSink {
    hosts: Mutex<HashMap<String, HostMetrics>>,
    backoff_log: Mutex<Vec<BackoffEvent>>,
}

impl MetricsSink {
    /// Creates a fresh, empty metrics sink.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submit(&self, host: &str, depth: usize) {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts.entry(host.to_string()).or_default();
        entry.total_enqueued += 1;
        entry.queue_depth = depth as i64;

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("dispatcher_total_enqueued", "host" => host.to_string()).increment(1);
            metrics::gauge!("dispatcher_queue_depth", "host" => host.to_string()).set(depth as f64);
        }
    }

    pub(crate) fn record_dequeue(&self, host: &str, depth: usize, wait: Duration) {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts.entry(host.to_string()).or_default();
        entry.queue_depth = depth as i64;
        entry.wait_times.push(wait.as_secs_f64());

        #[cfg(feature = "metrics")]
        {
            metrics::gauge!("dispatcher_queue_depth", "host" => host.to_string()).set(depth as f64);
            metrics::histogram!("dispatcher_wait_time_seconds", "host" => host.to_string())
                .record(wait.as_secs_f64());
        }
    }

    pub(crate) fn record_backoff(
        &self,
        host: &str,
        depth: usize,
        attempt: u32,
        delay: Duration,
        retry_after_hint: Option<f64>,
        status: u16,
        deadline: Instant,
    ) {
        {
            let mut hosts = self.hosts.lock().unwrap();
            let entry = hosts.entry(host.to_string()).or_default();
            entry.backoff_events += 1;
            entry.queue_depth = depth as i64;
            entry.last_backoff_seconds = Some(delay.as_secs_f64());
            entry.retry_after = Some(match entry.retry_after {
                Some(existing) if existing >= deadline => existing,
                _ => deadline,
            });
        }

        self.backoff_log.lock().unwrap().push(BackoffEvent {
            host: host.to_string(),
            attempt,
            delay,
            retry_after_hint,
            status,
        });

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("dispatcher_backoff_events_total", "host" => host.to_string())
                .increment(1);
            metrics::gauge!("dispatcher_queue_depth", "host" => host.to_string()).set(depth as f64);
            metrics::histogram!("dispatcher_backoff_delay_seconds", "host" => host.to_string())
                .record(delay.as_secs_f64());
        }
    }

    pub(crate) fn record_completed(&self, host: &str, depth: usize) {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts.entry(host.to_string()).or_default();
        entry.completed += 1;
        entry.queue_depth = depth as i64;

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("dispatcher_completed_total", "host" => host.to_string()).increment(1);
            metrics::gauge!("dispatcher_queue_depth", "host" => host.to_string()).set(depth as f64);
        }
    }

    pub(crate) fn record_rate_limit_exceeded(&self, host: &str, depth: usize) {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts.entry(host.to_string()).or_default();
        entry.rate_limit_exceeded += 1;
        entry.queue_depth = depth as i64;

        #[cfg(feature = "metrics")]
        metrics::counter!("dispatcher_rate_limit_exceeded_total", "host" => host.to_string())
            .increment(1);
    }

    pub(crate) fn record_operation_error(&self, host: &str, depth: usize) {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts.entry(host.to_string()).or_default();
        entry.operation_errors += 1;
        entry.queue_depth = depth as i64;

        #[cfg(feature = "metrics")]
        metrics::counter!("dispatcher_operation_errors_total", "host" => host.to_string())
            .increment(1);
    }

    pub(crate) fn record_cancelled(&self, host: &str, depth: usize) {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts.entry(host.to_string()).or_default();
        entry.cancelled += 1;
        entry.queue_depth = depth as i64;

        #[cfg(feature = "metrics")]
        metrics::counter!("dispatcher_cancelled_total", "host" => host.to_string()).increment(1);
    }

    /// Total tasks ever submitted for `host`.
    pub fn total_enqueued(&self, host: &str) -> u64 {
        self.with_host(host, |h| h.total_enqueued)
    }

    /// Tasks that reached a successful terminal state for `host`.
    pub fn completed(&self, host: &str) -> u64 {
        self.with_host(host, |h| h.completed)
    }

    /// Tasks that exhausted `max_attempts` while rate-limited for `host`.
    pub fn rate_limit_exceeded(&self, host: &str) -> u64 {
        self.with_host(host, |h| h.rate_limit_exceeded)
    }

    /// Tasks whose operation raised a non-rate-limit error for `host`.
    pub fn operation_errors(&self, host: &str) -> u64 {
        self.with_host(host, |h| h.operation_errors)
    }

    /// Tasks dropped because their submitter abandoned the handle, for `host`.
    pub fn cancelled(&self, host: &str) -> u64 {
        self.with_host(host, |h| h.cancelled)
    }

    /// Number of backoff events recorded for `host`.
    pub fn backoff_events(&self, host: &str) -> u64 {
        self.with_host(host, |h| h.backoff_events)
    }

    /// Last observed buffer size for `host`.
    pub fn queue_depth(&self, host: &str) -> i64 {
        self.with_host(host, |h| h.queue_depth)
    }

    /// Arithmetic mean of recorded wait-time samples for `host`, if any were
    /// recorded.
    pub fn average_wait_time(&self, host: &str) -> Option<f64> {
        let hosts = self.hosts.lock().unwrap();
        let h = hosts.get(host)?;
        if h.wait_times.is_empty() {
            None
        } else {
            Some(h.wait_times.iter().sum::<f64>() / h.wait_times.len() as f64)
        }
    }

    /// All recorded wait-time samples for `host`, in recording order.
    pub fn wait_times(&self, host: &str) -> Vec<f64> {
        self.with_host(host, |h| h.wait_times.clone())
    }

    /// The most recently computed backoff delay for `host`, in seconds.
    pub fn last_backoff_seconds(&self, host: &str) -> Option<f64> {
        let hosts = self.hosts.lock().unwrap();
        hosts.get(host).and_then(|h| h.last_backoff_seconds)
    }

    /// The absolute deadline before which no new operation may start on
    /// `host`, if a backoff is currently in effect.
    pub fn retry_after_deadline(&self, host: &str) -> Option<Instant> {
        let hosts = self.hosts.lock().unwrap();
        hosts.get(host).and_then(|h| h.retry_after)
    }

    /// A snapshot of every backoff event ever recorded, in emission order.
    pub fn backoff_log(&self) -> Vec<BackoffEvent> {
        self.backoff_log.lock().unwrap().clone()
    }

    fn with_host<T: Default>(&self, host: &str, f: impl FnOnce(&HostMetrics) -> T) -> T {
        let hosts = self.hosts.lock().unwrap();
        hosts.get(host).map(f).unwrap_or_default()
    }
}
