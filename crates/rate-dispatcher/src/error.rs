//! Error types for the dispatcher.

/// Errors that can terminate a [`crate::Dispatcher::submit`] call.
///
/// `E` is the error type the caller's operation itself can fail with; it is
/// passed through unmodified via [`DispatcherError::Operation`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatcherError<E> {
    /// Submission was attempted, or a task was still buffered, after
    /// [`crate::Dispatcher::close`] was called.
    #[error("dispatcher is closed")]
    Closed,

    /// The task exhausted `max_attempts` while repeatedly being classified
    /// as rate-limited.
    #[error("rate limit exceeded for host {host}")]
    RateLimitExceeded {
        /// The host the task was submitted to.
        host: String,
    },

    /// The supplied operation itself failed with a non-rate-limit error.
    #[error("operation failed: {0}")]
    Operation(#[source] E),
}

/// Result type for dispatcher operations.
pub type Result<T, E> = std::result::Result<T, DispatcherError<E>>;
