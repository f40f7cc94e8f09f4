//! Dispatcher configuration and its builder (§4.1, §4.4, §4.5).

use crate::backoff::{default_randomizer, BackoffPolicy, Randomizer};
use crate::events::QueueEvent;
use crate::metrics::MetricsSink;
use rate_dispatcher_core::events::{EventListeners, FnListener};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`crate::Dispatcher`].
pub struct DispatcherConfig {
    pub(crate) concurrency_per_host: usize,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) event_listeners: EventListeners<QueueEvent>,
    pub(crate) metrics: Arc<MetricsSink>,
    pub(crate) name: String,
}

/// Builder for [`DispatcherConfig`].
///
/// `max_attempts` is deliberately not configured here: §6's Configuration
/// Options table does not list it, since it is a per-call argument to
/// [`crate::Dispatcher::submit`], not a dispatcher-wide default.
pub struct DispatcherConfigBuilder {
    concurrency_per_host: usize,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
    randomizer: Randomizer,
    event_listeners: EventListeners<QueueEvent>,
    metrics: Option<Arc<MetricsSink>>,
    name: String,
}

impl Default for DispatcherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults (§6's Configuration Options table, matching the original
    /// request-queue implementation's `base_backoff=0.5, max_backoff=30.0,
    /// jitter=0.25`):
    /// - `concurrency_per_host`: 1 (strict per-host serialization, §4.2)
    /// - backoff: base 0.5s, max 30s, jitter ratio 0.25s, `rand`-backed randomizer
    /// - `name`: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            concurrency_per_host: 1,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter_ratio: 0.25,
            randomizer: default_randomizer(),
            event_listeners: EventListeners::new(),
            metrics: None,
            name: "<unnamed>".to_string(),
        }
    }

    /// Sets how many workers concurrently drain a single host's buffer.
    ///
    /// §4.2 describes the default serialized case (1); raising this trades
    /// the "strictly FIFO per host" guarantee for throughput, since workers
    /// racing for the same host can complete out of enqueue order.
    pub fn concurrency_per_host(mut self, n: usize) -> Self {
        self.concurrency_per_host = n.max(1);
        self
    }

    /// Sets the backoff baseline, cap, and absolute jitter bound (seconds).
    pub fn backoff(mut self, base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self.jitter_ratio = jitter_ratio;
        self
    }

    /// Overrides the jitter source. Intended for deterministic tests.
    pub fn randomizer(mut self, randomizer: Randomizer) -> Self {
        self.randomizer = randomizer;
        self
    }

    /// Supplies a metrics sink, e.g. to share one across multiple
    /// dispatcher instances.
    pub fn metrics_sink(mut self, sink: Arc<MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Sets the name for this dispatcher instance (used in logging).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback invoked when a task is submitted.
    pub fn on_submit<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let QueueEvent::Submitted { host, .. } = event {
                f(host);
            }
        }));
        self
    }

    /// Registers a callback invoked when a retry is scheduled after a
    /// rate-limit classification.
    pub fn on_backoff<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u32, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let QueueEvent::BackoffScheduled {
                host, attempt, delay, ..
            } = event
            {
                f(host, *attempt, *delay);
            }
        }));
        self
    }

    /// Registers a callback invoked when a task completes successfully.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let QueueEvent::Completed { host, .. } = event {
                f(host);
            }
        }));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DispatcherConfig {
        DispatcherConfig {
            concurrency_per_host: self.concurrency_per_host,
            backoff: BackoffPolicy::new(
                self.base_backoff,
                self.max_backoff,
                self.jitter_ratio,
                self.randomizer,
            ),
            event_listeners: self.event_listeners,
            metrics: self.metrics.unwrap_or_default(),
            name: self.name,
        }
    }
}
