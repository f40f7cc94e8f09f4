//! The dispatcher (§4): host-keyed submission, lazily-spawned per-host
//! workers, and the backoff-driven retry loop.

use crate::classify::classify;
use crate::config::DispatcherConfig;
use crate::error::DispatcherError;
use crate::events::QueueEvent;
use crate::host::HostState;
use crate::metrics::MetricsSink;
use crate::response::Response;
use crate::task::{Operation, Task};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Default `max_attempts` used by callers that don't need a per-call
/// override (§6's `submit(host, op, max_attempts=5)`).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// A host-keyed, rate-limit-aware request dispatcher.
///
/// Tasks submitted for the same host run strictly in submission order
/// (when `concurrency_per_host` is 1, the default); tasks for different
/// hosts run fully in parallel. When an operation's response is classified
/// as rate-limited (§4.3), the dispatcher backs off that host exponentially
/// (§4.4) before retrying, up to `max_attempts`.
///
/// Cloning a `Dispatcher` is cheap and shares the same underlying state —
/// all clones see the same hosts, buffers, and metrics.
pub struct Dispatcher<P, E> {
    inner: Arc<Inner<P, E>>,
}

impl<P, E> Clone for Dispatcher<P, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<P, E> {
    config: DispatcherConfig,
    hosts: Mutex<HashMap<String, Arc<HostState<P, E>>>>,
    closed: AtomicBool,
}

impl<P, E> Dispatcher<P, E>
where
    P: Send + 'static,
    E: Send + 'static,
{
    /// Starts building a dispatcher with a [`crate::DispatcherConfigBuilder`].
    pub fn builder() -> crate::DispatcherConfigBuilder {
        crate::DispatcherConfigBuilder::new()
    }

    /// Creates a dispatcher from an already-built configuration.
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                hosts: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the shared metrics sink.
    pub fn metrics(&self) -> Arc<MetricsSink> {
        Arc::clone(&self.inner.config.metrics)
    }

    /// Submits an operation for `host`, allowed up to `max_attempts` tries,
    /// and awaits its terminal result (§6: `submit(host, op, max_attempts)`).
    ///
    /// The returned future resolves once the operation has succeeded, has
    /// exhausted `max_attempts` while rate-limited, has failed with a
    /// non-rate-limit error, or the dispatcher was closed. Dropping the
    /// returned future before it resolves cancels the task silently (§7) —
    /// no error is observed by anyone, since there is no one left to observe
    /// it.
    ///
    /// Fails immediately with [`DispatcherError::Closed`] if [`Self::close`]
    /// has already been called, without ever touching this host's state.
    pub async fn submit(
        &self,
        host: impl Into<String>,
        op: Operation<P, E>,
        max_attempts: u32,
    ) -> Result<Response<P>, DispatcherError<E>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DispatcherError::Closed);
        }

        let host = host.into();
        let (tx, rx) = oneshot::channel();
        let max_attempts = max_attempts.max(1);

        let host_state = self.ensure_host(&host);
        let task = Task::new(host.clone(), op, tx, max_attempts);
        let depth = host_state.push(task);

        self.inner.config.metrics.record_submit(&host, depth);
        self.inner.config.event_listeners.emit(&QueueEvent::Submitted {
            host: host.clone(),
            timestamp: Instant::now(),
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(dispatcher = %self.inner.config.name, host = %host, depth, "task submitted");

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                // The sender was dropped without sending — only happens when
                // a delayed-requeue timer was aborted by `close` (§9).
                Err(DispatcherError::Closed)
            }
        }
    }

    /// Closes the dispatcher: no further submissions are accepted, no
    /// further workers are spawned, every currently-buffered task
    /// (including those awaiting a delayed requeue) is settled with
    /// [`DispatcherError::Closed`], and `close` waits for any in-flight
    /// operation — and any in-flight delayed-requeue timer — to actually
    /// finish before returning, so that every outstanding task is either
    /// completed or cancelled by the time it resolves.
    ///
    /// Idempotent: calling `close` more than once, or concurrently from
    /// multiple tasks, is safe.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);

        let hosts: Vec<(String, Arc<HostState<P, E>>)> = {
            let guard = self.inner.hosts.lock().unwrap();
            guard.iter().map(|(host, state)| (host.clone(), Arc::clone(state))).collect()
        };

        for (host, host_state) in hosts {
            let (drained, handles) = host_state.begin_close();

            for task in drained {
                task.settle(Err(DispatcherError::Closed));
            }

            self.inner.config.event_listeners.emit(&QueueEvent::Closed {
                host: host.clone(),
                timestamp: Instant::now(),
            });

            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    fn ensure_host(&self, host: &str) -> Arc<HostState<P, E>> {
        let mut hosts = self.inner.hosts.lock().unwrap();
        if let Some(existing) = hosts.get(host) {
            return Arc::clone(existing);
        }

        let host_state = Arc::new(HostState::new());
        hosts.insert(host.to_string(), Arc::clone(&host_state));

        for _ in 0..self.inner.config.concurrency_per_host {
            let worker_state = Arc::clone(&host_state);
            let dispatcher = self.clone();
            let host_name = host.to_string();
            let handle = tokio::spawn(async move {
                dispatcher.run_worker(host_name, worker_state).await;
            });
            host_state.register_worker(handle);
        }

        host_state
    }

    async fn run_worker(&self, host: String, host_state: Arc<HostState<P, E>>) {
        while let Some((mut task, depth)) = host_state.pop().await {
            let wait = task.enqueued_at.elapsed();
            self.inner.config.metrics.record_dequeue(&host, depth, wait);
            self.inner.config.event_listeners.emit(&QueueEvent::Dequeued {
                host: host.clone(),
                timestamp: Instant::now(),
                wait,
            });

            if task.is_cancelled() {
                let depth = host_state.depth();
                self.inner.config.metrics.record_cancelled(&host, depth);
                continue;
            }

            let deadline = { host_state.backoff.lock().unwrap().retry_after };
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if deadline > now {
                    tokio::time::sleep(deadline - now).await;
                }
            }

            task.attempt += 1;
            let result = (task.op)().await;

            match result {
                Ok(response) => {
                    let classification = classify(&response);
                    if classification.rate_limited {
                        self.handle_rate_limited(&host, &host_state, task, response, classification.retry_after_hint);
                    } else if task.is_cancelled() {
                        let depth = host_state.depth();
                        self.inner.config.metrics.record_cancelled(&host, depth);
                    } else {
                        host_state.backoff.lock().unwrap().consecutive_backoffs = 0;
                        let depth = host_state.depth();
                        self.inner.config.metrics.record_completed(&host, depth);
                        self.inner.config.event_listeners.emit(&QueueEvent::Completed {
                            host: host.clone(),
                            timestamp: Instant::now(),
                        });
                        task.settle(Ok(response));
                    }
                }
                Err(err) => {
                    // §9 Open Question decision: consecutive_backoffs is not
                    // reset on an operation error, only on success.
                    #[cfg(feature = "tracing")]
                    tracing::debug!(host = %host, attempt = task.attempt, "operation failed");

                    let depth = host_state.depth();
                    if task.is_cancelled() {
                        self.inner.config.metrics.record_cancelled(&host, depth);
                    } else {
                        self.inner.config.metrics.record_operation_error(&host, depth);
                        task.settle(Err(DispatcherError::Operation(err)));
                    }
                }
            }
        }
    }

    fn handle_rate_limited(
        &self,
        host: &str,
        host_state: &Arc<HostState<P, E>>,
        task: Task<P, E>,
        response: Response<P>,
        retry_after_hint: Option<f64>,
    ) {
        // The backoff event is recorded unconditionally, even if this
        // attempt turns out to be the task's last: the host really was
        // observed throttling, independent of whether this submitter will
        // see a retry or an exhaustion error.
        let consecutive_backoffs = {
            let mut backoff = host_state.backoff.lock().unwrap();
            backoff.consecutive_backoffs += 1;
            backoff.consecutive_backoffs
        };

        let delay = self.inner.config.backoff.compute_delay(consecutive_backoffs, retry_after_hint);
        let deadline = Instant::now() + delay;

        {
            let mut backoff = host_state.backoff.lock().unwrap();
            backoff.retry_after = Some(match backoff.retry_after {
                Some(existing) if existing >= deadline => existing,
                _ => deadline,
            });
        }

        let depth = host_state.depth();
        self.inner.config.metrics.record_backoff(
            host,
            depth,
            task.attempt,
            delay,
            retry_after_hint,
            response.status,
            deadline,
        );
        self.inner.config.event_listeners.emit(&QueueEvent::BackoffScheduled {
            host: host.to_string(),
            timestamp: Instant::now(),
            attempt: task.attempt,
            delay,
        });

        #[cfg(feature = "tracing")]
        tracing::warn!(host = %host, attempt = task.attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");

        if task.is_cancelled() {
            // No submitter is left to observe either an exhaustion error or
            // a requeued retry; count it as cancelled and drop now rather
            // than hold buffer/timer resources for nothing.
            let depth = host_state.depth();
            self.inner.config.metrics.record_cancelled(host, depth);
            return;
        }

        if task.attempt >= task.max_attempts {
            let depth = host_state.depth();
            self.inner.config.metrics.record_rate_limit_exceeded(host, depth);
            task.settle(Err(DispatcherError::RateLimitExceeded {
                host: host.to_string(),
            }));
            return;
        }

        if host_state.closed.load(std::sync::atomic::Ordering::Acquire) {
            task.settle(Err(DispatcherError::Closed));
            return;
        }

        let requeue_state = Arc::clone(host_state);
        let requeue_handle = tokio::spawn(schedule_requeue(requeue_state, task, delay));
        host_state.register_pending_requeue(requeue_handle);
    }
}

fn schedule_requeue<P, E>(
    host_state: Arc<HostState<P, E>>,
    task: Task<P, E>,
    delay: Duration,
) -> impl Future<Output = ()>
where
    P: Send + 'static,
    E: Send + 'static,
{
    async move {
        tokio::time::sleep(delay).await;

        if host_state.closed.load(std::sync::atomic::Ordering::Acquire) {
            task.settle(Err(DispatcherError::Closed));
            return;
        }

        host_state.push(task);
    }
}
