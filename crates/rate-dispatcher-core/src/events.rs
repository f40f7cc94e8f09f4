//! Event system for the dispatcher.
//!
//! A single, small observability mechanism reused everywhere the dispatcher
//! needs to tell the outside world that something happened, independent of
//! the metrics sink (which aggregates; this just notifies).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait for events emitted by the dispatcher.
pub trait DispatcherEvent: Send + Sync + fmt::Debug {
    /// Returns the type of event (e.g. "submitted", "backoff_scheduled").
    fn event_type(&self) -> &'static str;

    /// Returns when this event occurred.
    fn timestamp(&self) -> Instant;

    /// Returns the host this event pertains to.
    fn host(&self) -> &str;
}

/// Trait for listening to dispatcher events.
pub trait EventListener<E: DispatcherEvent>: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &E);
}

/// Type alias for boxed event listeners.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// A collection of event listeners.
#[derive(Clone)]
pub struct EventListeners<E: DispatcherEvent> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: DispatcherEvent> EventListeners<E> {
    /// Creates a new empty event listener collection.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Adds a listener to the collection.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to all registered listeners.
    ///
    /// If a listener panics, the panic is caught and the remaining listeners
    /// still run — one misbehaving listener must not stop the dispatcher
    /// from notifying the others, let alone from making scheduling progress.
    pub fn emit(&self, event: &E) {
        for (index, listener) in self.listeners.iter().enumerate() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if let Err(_panic_payload) = result {
                #[cfg(feature = "tracing")]
                log_listener_panic(index, event, _panic_payload.as_ref());

                #[cfg(feature = "metrics")]
                record_listener_panic_metric(event);

                #[cfg(not(feature = "tracing"))]
                let _ = index;

                #[cfg(not(any(feature = "tracing", feature = "metrics")))]
                let _ = _panic_payload;
            }
        }
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: DispatcherEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple function-based event listener.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: DispatcherEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event);
    }
}

#[cfg(feature = "tracing")]
fn log_listener_panic<E: DispatcherEvent>(
    index: usize,
    event: &E,
    payload: &(dyn std::any::Any + Send),
) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    tracing::warn!(
        listener_index = index,
        event_type = event.event_type(),
        host = event.host(),
        panic_message = %message,
        "event listener panicked"
    );
}

#[cfg(feature = "metrics")]
fn record_listener_panic_metric<E: DispatcherEvent>(event: &E) {
    metrics::counter!(
        "dispatcher_listener_panics_total",
        "event_type" => event.event_type()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestEvent {
        host: String,
        at: Instant,
    }

    impl DispatcherEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "test"
        }

        fn timestamp(&self) -> Instant {
            self.at
        }

        fn host(&self) -> &str {
            &self.host
        }
    }

    #[test]
    fn empty_by_default() {
        let listeners: EventListeners<TestEvent> = EventListeners::new();
        assert!(listeners.is_empty());
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn fn_listener_is_invoked() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(move |_: &TestEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&TestEvent {
            host: "example.com".into(),
            at: Instant::now(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_panicking_listener_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(|_: &TestEvent| {
            panic!("boom");
        }));
        listeners.add(FnListener::new(move |_: &TestEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&TestEvent {
            host: "example.com".into(),
            at: Instant::now(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
