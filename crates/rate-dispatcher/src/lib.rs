//! A host-keyed, rate-limit-aware request dispatcher.
//!
//! This crate schedules async operations ("submit a request to host X") so
//! that requests to the same host never run concurrently faster than that
//! host tolerates, while requests to different hosts proceed fully in
//! parallel. When a host signals it is rate limiting the caller — an HTTP
//! 429, a `Retry-After` header, `X-RateLimit-Remaining: 0`, or a secondary
//! rate-limit header — the dispatcher backs off that host exponentially
//! (with jitter) and retries, up to a configurable attempt limit.
//!
//! # Features
//!
//! - **Strict per-host ordering**: a FIFO buffer per host, drained by one
//!   worker by default (§4.2)
//! - **Rate-limit classification**: status code and header inspection,
//!   independent of any particular HTTP client (§4.3)
//! - **Exponential backoff with jitter**: capped, server-hint-aware, with an
//!   injectable randomizer for deterministic tests (§4.4)
//! - **Metrics**: a queryable [`MetricsSink`], optionally mirrored into the
//!   `metrics` crate facade
//! - **Events**: an observer hook independent of metrics, for logging or
//!   custom instrumentation
//!
//! # Example
//!
//! ```
//! use rate_dispatcher::{Dispatcher, Operation, Response};
//! use std::time::Duration;
//!
//! # #[derive(Debug)]
//! # struct MyError;
//! # impl std::fmt::Display for MyError {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//! #         write!(f, "MyError")
//! #     }
//! # }
//! # impl std::error::Error for MyError {}
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Dispatcher::<String, MyError>::builder()
//!     .backoff(Duration::from_millis(100), Duration::from_secs(30), 0.25)
//!     .on_backoff(|host, attempt, delay| {
//!         println!("backing off {host} (attempt {attempt}) for {delay:?}");
//!     })
//!     .build();
//!
//! let dispatcher: Dispatcher<String, MyError> = Dispatcher::new(config);
//!
//! let op: Operation<String, MyError> = std::sync::Arc::new(|| {
//!     Box::pin(async { Ok(Response::new(200, "payload".to_string())) })
//!         as futures::future::BoxFuture<'static, Result<Response<String>, MyError>>
//! });
//! let response = dispatcher.submit("api.example.com", op, 5).await?;
//!
//! assert_eq!(response.status, 200);
//!
//! dispatcher.close().await;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod classify;
mod config;
mod dispatcher;
mod error;
mod events;
mod host;
mod metrics;
mod response;
mod task;

pub use backoff::{default_randomizer, BackoffPolicy, Randomizer};
pub use classify::{classify, Classification};
pub use config::{DispatcherConfig, DispatcherConfigBuilder};
pub use dispatcher::{Dispatcher, DEFAULT_MAX_ATTEMPTS};
pub use error::{DispatcherError, Result};
pub use events::QueueEvent;
pub use metrics::{BackoffEvent, MetricsSink};
pub use response::{HeaderMap, Response};
pub use task::Operation;
