//! End-to-end scenarios for the dispatcher's submission/backoff/close
//! lifecycle, run against a real multi-threaded Tokio runtime since they
//! depend on genuine concurrency and timing.

use rate_dispatcher::{Dispatcher, DispatcherError, HeaderMap, Operation, Response};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
struct Boom;

fn always_ok(status: u16) -> Operation<u32, Boom> {
    Arc::new(move || {
        Box::pin(async move { Ok(Response::new(status, 0u32)) })
            as futures::future::BoxFuture<'static, Result<Response<u32>, Boom>>
    })
}

fn always_err() -> Operation<u32, Boom> {
    Arc::new(|| Box::pin(async { Err(Boom) }) as futures::future::BoxFuture<'static, Result<Response<u32>, Boom>>)
}

fn zero_jitter_dispatcher() -> Dispatcher<u32, Boom> {
    let config = Dispatcher::<u32, Boom>::builder()
        .backoff(Duration::from_millis(50), Duration::from_secs(5), 0.0)
        .build();
    Dispatcher::new(config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn serialization_two_slow_tasks_never_overlap() {
    let dispatcher = zero_jitter_dispatcher();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_observed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let in_flight = Arc::clone(&in_flight);
        let max_observed = Arc::clone(&max_observed);
        let op: Operation<u32, Boom> = Arc::new(move || {
            let in_flight = Arc::clone(&in_flight);
            let max_observed = Arc::clone(&max_observed);
            Box::pin(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Response::new(200, 0u32))
            }) as futures::future::BoxFuture<'static, Result<Response<u32>, Boom>>
        });
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.submit("example.com", op, 5).await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.metrics().completed("example.com"), 2);
    assert_eq!(dispatcher.metrics().queue_depth("example.com"), 0);

    dispatcher.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_after_is_honored_then_succeeds() {
    let dispatcher = zero_jitter_dispatcher();
    let calls = Arc::new(AtomicU32::new(0));

    let calls_clone = Arc::clone(&calls);
    let op: Operation<u32, Boom> = Arc::new(move || {
        let calls = Arc::clone(&calls_clone);
        Box::pin(async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", "0.2");
                Ok(Response::with_headers(429, headers, 0u32))
            } else {
                Ok(Response::new(200, 0u32))
            }
        }) as futures::future::BoxFuture<'static, Result<Response<u32>, Boom>>
    });

    let start = tokio::time::Instant::now();
    let response = dispatcher.submit("example.com", op, 5).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(response.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.metrics().backoff_events("example.com"), 1);
    assert!(elapsed >= Duration::from_millis(190), "elapsed = {elapsed:?}");

    let last = dispatcher.metrics().last_backoff_seconds("example.com").unwrap();
    assert!((last - 0.2).abs() < 0.05, "last_backoff_seconds = {last}");

    dispatcher.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn exhaustion_still_records_a_backoff_event() {
    let dispatcher = zero_jitter_dispatcher();
    let op: Operation<u32, Boom> = always_ok_429();

    let result = dispatcher.submit("example.com", op, 1).await;

    assert!(matches!(
        result,
        Err(DispatcherError::RateLimitExceeded { host }) if host == "example.com"
    ));
    assert_eq!(dispatcher.metrics().backoff_events("example.com"), 1);
    assert_eq!(dispatcher.metrics().completed("example.com"), 0);
    assert_eq!(dispatcher.metrics().rate_limit_exceeded("example.com"), 1);

    dispatcher.close().await;
}

fn always_ok_429() -> Operation<u32, Boom> {
    Arc::new(|| {
        Box::pin(async { Ok(Response::new(429, 0u32)) })
            as futures::future::BoxFuture<'static, Result<Response<u32>, Boom>>
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn operation_error_is_surfaced_and_recorded() {
    let dispatcher = zero_jitter_dispatcher();

    let result = dispatcher.submit("example.com", always_err(), 5).await;

    assert!(matches!(result, Err(DispatcherError::Operation(Boom))));
    assert_eq!(dispatcher.metrics().operation_errors("example.com"), 1);
    assert_eq!(dispatcher.metrics().completed("example.com"), 0);
    assert_eq!(dispatcher.metrics().rate_limit_exceeded("example.com"), 0);
    assert_eq!(dispatcher.metrics().cancelled("example.com"), 0);

    dispatcher.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cross_task_backoff_inherited_by_next_submission() {
    let dispatcher = zero_jitter_dispatcher();

    let first_op: Operation<u32, Boom> = Arc::new(|| {
        Box::pin(async {
            let mut headers = HeaderMap::new();
            headers.insert("Retry-After", "0.15");
            Ok(Response::with_headers(429, headers, 0u32))
        }) as futures::future::BoxFuture<'static, Result<Response<u32>, Boom>>
    });
    let first_result = dispatcher.submit("example.com", first_op, 1).await;
    assert!(first_result.is_err());

    let deadline = dispatcher
        .metrics()
        .retry_after_deadline("example.com")
        .expect("backoff recorded a deadline");

    let second_start = tokio::time::Instant::now();
    let second_op = always_ok(200);
    dispatcher.submit("example.com", second_op, 5).await.unwrap();
    let second_started_after = second_start.elapsed();

    assert!(tokio::time::Instant::now() >= deadline || second_started_after >= Duration::from_millis(1));

    dispatcher.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_hosts_do_not_block_each_other() {
    let dispatcher = zero_jitter_dispatcher();

    let slow_host_op = always_ok_429();
    let slow_result = dispatcher.submit("slow.example.com", slow_host_op, 1).await;
    assert!(slow_result.is_err());

    let fast_start = tokio::time::Instant::now();
    dispatcher
        .submit("fast.example.com", always_ok(200), 5)
        .await
        .unwrap();
    let fast_elapsed = fast_start.elapsed();

    assert!(fast_elapsed < Duration::from_millis(40), "fast_elapsed = {fast_elapsed:?}");
    dispatcher.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_track_three_staggered_submissions() {
    let dispatcher = zero_jitter_dispatcher();

    for i in 0..3u32 {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let dispatcher = dispatcher.clone();
        dispatcher.submit("example.com", always_ok(200), 5).await.unwrap();
    }

    assert_eq!(dispatcher.metrics().queue_depth("example.com"), 0);
    let wait_times = dispatcher.metrics().wait_times("example.com");
    assert_eq!(wait_times.len(), 3);
    assert!(wait_times.iter().any(|&w| w > 0.0));

    dispatcher.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn close_drains_buffered_tasks_with_closed_error() {
    let dispatcher = zero_jitter_dispatcher();

    // Hold the single worker busy with a slow first task, so the following
    // submissions remain buffered when close() is called.
    let gate = Arc::new(tokio::sync::Notify::new());
    let gate_clone = Arc::clone(&gate);
    let blocking_op: Operation<u32, Boom> = Arc::new(move || {
        let gate = Arc::clone(&gate_clone);
        Box::pin(async move {
            gate.notified().await;
            Ok(Response::new(200, 0u32))
        }) as futures::future::BoxFuture<'static, Result<Response<u32>, Boom>>
    });

    let dispatcher_for_blocker = dispatcher.clone();
    let blocker = tokio::spawn(async move {
        dispatcher_for_blocker.submit("example.com", blocking_op, 5).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;

    let buffered: Vec<_> = (0..3)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit("example.com", always_ok(200), 5).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;

    // `close` waits for the in-flight operation to finish, so it must run
    // concurrently with releasing the gate rather than being awaited first.
    let closer = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.close().await })
    };
    gate.notify_one();
    closer.await.unwrap();

    for handle in buffered {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(DispatcherError::Closed)));
    }

    let _ = blocker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_after_close_is_rejected_immediately() {
    let dispatcher = zero_jitter_dispatcher();
    dispatcher.close().await;

    let start = tokio::time::Instant::now();
    let result = dispatcher.submit("new.example.com", always_ok(200), 5).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(DispatcherError::Closed)));
    assert!(elapsed < Duration::from_millis(10), "elapsed = {elapsed:?}");
    assert_eq!(dispatcher.metrics().completed("new.example.com"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_submit_future_is_cancelled_silently() {
    let dispatcher = zero_jitter_dispatcher();
    let executed = Arc::new(AtomicUsize::new(0));
    let executed_clone = Arc::clone(&executed);

    let blocking_op: Operation<u32, Boom> = Arc::new(move || {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(Response::new(200, 0u32))
        }) as futures::future::BoxFuture<'static, Result<Response<u32>, Boom>>
    });

    let dispatcher_first = dispatcher.clone();
    tokio::spawn(async move {
        let _ = dispatcher_first.submit("example.com", blocking_op, 5).await;
    });

    tokio::time::sleep(Duration::from_millis(5)).await;

    {
        // Submit and immediately drop the future before it is ever polled
        // to completion: the task is still pushed onto the buffer (since
        // `submit` pushes before awaiting), then abandoned before the
        // worker ever reaches it.
        let op: Operation<u32, Boom> = Arc::new(move || {
            let executed = Arc::clone(&executed_clone);
            Box::pin(async move {
                executed.fetch_add(1, Ordering::SeqCst);
                Ok(Response::new(200, 0u32))
            }) as futures::future::BoxFuture<'static, Result<Response<u32>, Boom>>
        });
        let fut = dispatcher.submit("example.com", op, 5);
        tokio::pin!(fut);
        tokio::time::timeout(Duration::from_millis(1), &mut fut)
            .await
            .ok();
    }

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(executed.load(Ordering::SeqCst), 0, "a cancelled task must never run its operation");
    assert_eq!(dispatcher.metrics().operation_errors("example.com"), 0);
    assert_eq!(dispatcher.metrics().rate_limit_exceeded("example.com"), 0);
    assert_eq!(dispatcher.metrics().cancelled("example.com"), 1);

    dispatcher.close().await;
}
