//! Events emitted by the dispatcher at each state transition (§2, §4.6).

use rate_dispatcher_core::events::DispatcherEvent;
use std::time::{Duration, Instant};

/// Events emitted by the dispatcher, independent of the metrics sink.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A task was appended to a host's buffer.
    Submitted { host: String, timestamp: Instant },
    /// A worker dequeued a task and is about to invoke its operation.
    Dequeued {
        host: String,
        timestamp: Instant,
        wait: Duration,
    },
    /// A response was classified as rate-limited and a retry was scheduled.
    BackoffScheduled {
        host: String,
        timestamp: Instant,
        attempt: u32,
        delay: Duration,
    },
    /// A task reached a successful terminal state.
    Completed { host: String, timestamp: Instant },
    /// The dispatcher was closed; remaining buffered tasks were cancelled.
    Closed { host: String, timestamp: Instant },
}

impl DispatcherEvent for QueueEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::Submitted { .. } => "submitted",
            QueueEvent::Dequeued { .. } => "dequeued",
            QueueEvent::BackoffScheduled { .. } => "backoff_scheduled",
            QueueEvent::Completed { .. } => "completed",
            QueueEvent::Closed { .. } => "closed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            QueueEvent::Submitted { timestamp, .. }
            | QueueEvent::Dequeued { timestamp, .. }
            | QueueEvent::BackoffScheduled { timestamp, .. }
            | QueueEvent::Completed { timestamp, .. }
            | QueueEvent::Closed { timestamp, .. } => *timestamp,
        }
    }

    fn host(&self) -> &str {
        match self {
            QueueEvent::Submitted { host, .. }
            | QueueEvent::Dequeued { host, .. }
            | QueueEvent::BackoffScheduled { host, .. }
            | QueueEvent::Completed { host, .. }
            | QueueEvent::Closed { host, .. } => host,
        }
    }
}
