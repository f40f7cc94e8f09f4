//! Per-host state (§3): the FIFO task buffer, the current retry-after
//! deadline, the consecutive-backoff count, and the worker set that owns
//! this host exclusively.

use crate::task::Task;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// The mutable backoff state for a host: the deadline before which no new
/// operation may start, and how many consecutive backoffs have occurred
/// since the last success.
///
/// Kept behind its own small `Mutex`, separate from the task buffer, since
/// workers read/write it on every dequeue without necessarily touching the
/// buffer at the same instant (e.g. while sleeping out a `retry_after`).
#[derive(Debug, Default)]
pub(crate) struct BackoffState {
    pub(crate) retry_after: Option<Instant>,
    pub(crate) consecutive_backoffs: u32,
}

pub(crate) struct HostState<P, E> {
    buffer: Mutex<VecDeque<Task<P, E>>>,
    notify: Notify,
    pub(crate) backoff: Mutex<BackoffState>,
    pub(crate) closed: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Delayed-requeue timers currently in flight. Aborted, then awaited,
    /// on close — see the REDESIGN FLAGS entry in SPEC_FULL.md §9.
    pending_requeues: Mutex<Vec<JoinHandle<()>>>,
}

impl<P, E> HostState<P, E> {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            backoff: Mutex::new(BackoffState::default()),
            closed: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            pending_requeues: Mutex::new(Vec::new()),
        }
    }

    /// Appends a task to the tail of the buffer and wakes one blocked
    /// worker. Returns the buffer depth immediately after the push.
    pub(crate) fn push(&self, task: Task<P, E>) -> usize {
        let depth = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.push_back(task);
            buffer.len()
        };
        self.notify.notify_one();
        depth
    }

    /// Blocks until a task is available or the host is closed, returning
    /// `None` in the latter case once the buffer has drained. Also returns
    /// the buffer depth right after the pop, for metrics.
    pub(crate) async fn pop(&self) -> Option<(Task<P, E>, usize)> {
        loop {
            {
                let mut buffer = self.buffer.lock().unwrap();
                if let Some(task) = buffer.pop_front() {
                    return Some((task, buffer.len()));
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Current buffer depth, for metrics reads that don't pop.
    pub(crate) fn depth(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub(crate) fn register_worker(&self, handle: JoinHandle<()>) {
        self.workers.lock().unwrap().push(handle);
    }

    pub(crate) fn register_pending_requeue(&self, handle: JoinHandle<()>) {
        self.pending_requeues.lock().unwrap().push(handle);
    }

    /// Marks the host closed, wakes every worker blocked in `pop`, drains
    /// the buffer (returning its contents for the caller to settle), and
    /// aborts in-flight delayed-requeue timers. Returns every handle the
    /// caller must await before it can guarantee this host has no
    /// outstanding work left: the worker loops, and the now-aborted
    /// requeue timers. Awaiting an aborted handle still completes (with a
    /// cancelled `JoinError`, discarded by the caller) once the task's
    /// drop glue — which settles the abandoned `Task`'s oneshot with
    /// `ClosedError` — has actually run; without awaiting it, nothing
    /// guarantees that drop has happened by the time `close()` returns.
    pub(crate) fn begin_close(&self) -> (Vec<Task<P, E>>, Vec<JoinHandle<()>>) {
        self.closed.store(true, Ordering::Release);

        let drained: Vec<Task<P, E>> = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.drain(..).collect()
        };

        self.notify.notify_waiters();

        let pending_requeues: Vec<JoinHandle<()>> =
            self.pending_requeues.lock().unwrap().drain(..).collect();
        for handle in &pending_requeues {
            handle.abort();
        }

        let mut handles: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        handles.extend(pending_requeues);
        (drained, handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use tokio::sync::oneshot;

    fn dummy_task() -> Task<(), ()> {
        let (tx, _rx) = oneshot::channel();
        Task::new(
            "h".into(),
            std::sync::Arc::new(|| Box::pin(async { Ok(Response::new(200, ())) })),
            tx,
            5,
        )
    }

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let host: HostState<(), ()> = HostState::new();
        host.push(dummy_task());
        host.push(dummy_task());

        let (_first, depth_after_first) = host.pop().await.unwrap();
        assert_eq!(depth_after_first, 1);

        let (_second, depth_after_second) = host.pop().await.unwrap();
        assert_eq!(depth_after_second, 0);
    }

    #[tokio::test]
    async fn pop_blocks_until_pushed() {
        let host = std::sync::Arc::new(HostState::<(), ()>::new());
        let host2 = std::sync::Arc::clone(&host);

        let popper = tokio::spawn(async move { host2.pop().await.is_some() });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        host.push(dummy_task());

        assert!(popper.await.unwrap());
    }

    #[tokio::test]
    async fn begin_close_drains_buffer_and_unblocks_pop() {
        let host = std::sync::Arc::new(HostState::<(), ()>::new());
        host.push(dummy_task());
        host.push(dummy_task());

        let host2 = std::sync::Arc::clone(&host);
        let waiter = tokio::spawn(async move { host2.pop().await });

        let (drained, _workers) = host.begin_close();
        assert_eq!(drained.len(), 2);

        assert!(waiter.await.unwrap().is_none());
    }
}
