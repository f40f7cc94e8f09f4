//! Queued task: the internal record binding an operation, a completion
//! handle, an enqueue timestamp, and an attempt counter (§3).

use crate::error::DispatcherError;
use crate::response::Response;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// A caller-supplied producer of a response, opaque to the dispatcher.
pub type Operation<P, E> =
    Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<Response<P>, E>> + Send + Sync>;

/// The settable-once handle delivered to the submitter.
///
/// Backed by `tokio::sync::oneshot`, whose `Sender::send` consumes `self` —
/// the "settled exactly once" invariant is therefore a type-level guarantee,
/// not a runtime check.
pub(crate) type Completion<P, E> = oneshot::Sender<std::result::Result<Response<P>, DispatcherError<E>>>;

/// An internal record for one submitted (and possibly retried) request.
pub(crate) struct Task<P, E> {
    pub(crate) host: String,
    pub(crate) op: Operation<P, E>,
    pub(crate) completion: Completion<P, E>,
    pub(crate) enqueued_at: Instant,
    pub(crate) attempt: u32,
    pub(crate) max_attempts: u32,
}

impl<P, E> Task<P, E> {
    pub(crate) fn new(
        host: String,
        op: Operation<P, E>,
        completion: Completion<P, E>,
        max_attempts: u32,
    ) -> Self {
        Self {
            host,
            op,
            completion,
            enqueued_at: Instant::now(),
            attempt: 0,
            max_attempts,
        }
    }

    /// Settles the completion handle. A submitter who dropped the receiving
    /// end simply never observes this; that is the `Cancelled` case (§7) and
    /// is not itself an error.
    pub(crate) fn settle(self, result: std::result::Result<Response<P>, DispatcherError<E>>) {
        let _ = self.completion.send(result);
    }

    /// True if the submitter has already abandoned this task's handle.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.completion.is_closed()
    }
}
