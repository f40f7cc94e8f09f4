use rate_dispatcher::{Dispatcher, HeaderMap, Operation, Response};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct ApiError(String);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "api error: {}", self.0)
    }
}

impl std::error::Error for ApiError {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Rate Dispatcher Example");
    println!("=======================\n");

    let config = Dispatcher::<String, ApiError>::builder()
        .backoff(Duration::from_millis(200), Duration::from_secs(10), 0.25)
        .on_backoff(|host, attempt, delay| {
            println!("  [BACKOFF] {host} attempt {attempt}, retrying after {delay:?}");
        })
        .on_complete(|host| {
            println!("  [DONE] {host}");
        })
        .build();

    let dispatcher: Dispatcher<String, ApiError> = Dispatcher::new(config);

    // A flaky endpoint that rate limits the first two calls, then succeeds.
    let calls = Arc::new(AtomicU32::new(0));
    let calls_for_op = Arc::clone(&calls);
    let flaky: Operation<String, ApiError> = Arc::new(move || {
        let calls = Arc::clone(&calls_for_op);
        Box::pin(async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", "0.1");
                Ok(Response::with_headers(429, headers, String::new()))
            } else {
                Ok(Response::new(200, "payload from api.example.com".to_string()))
            }
        }) as futures::future::BoxFuture<'static, Result<Response<String>, ApiError>>
    });

    println!("Submitting a flaky request to api.example.com...");
    let response = dispatcher.submit("api.example.com", flaky, 5).await?;
    println!("Result: {} ({})\n", response.status, response.payload);

    // Two independent hosts never block each other.
    let quiet: Operation<String, ApiError> = Arc::new(|| {
        Box::pin(async { Ok(Response::new(200, "payload from quiet.example.com".to_string())) })
            as futures::future::BoxFuture<'static, Result<Response<String>, ApiError>>
    });
    let response = dispatcher.submit("quiet.example.com", quiet, 5).await?;
    println!("Result: {} ({})\n", response.status, response.payload);

    let metrics = dispatcher.metrics();
    println!(
        "api.example.com: completed={} backoff_events={}",
        metrics.completed("api.example.com"),
        metrics.backoff_events("api.example.com"),
    );

    dispatcher.close().await;
    Ok(())
}
