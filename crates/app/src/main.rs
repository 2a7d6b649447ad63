use std::env;
use std::time::{Duration, Instant};

use app::server::{AppState, build_router};
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use pyrun::{DEFAULT_INTERPRETER, Executor, ExecutorConfig};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const DEFAULT_PORT: u16 = 8080;
const EXECUTION_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_MAX_INFLIGHT: usize = 64;
// Above the execution deadline so the executor, not this layer, owns the
// 408 path.
const REQUEST_TIMEOUT_SECONDS: u64 = 90;

async fn log_request_response(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    println!("request: {method} {uri}");
    let response = next.run(request).await;
    println!(
        "response: {method} {uri} status={} latency_ms={}",
        response.status(),
        start.elapsed().as_millis()
    );
    response
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    let executor = Executor::new(ExecutorConfig {
        interpreter: DEFAULT_INTERPRETER.to_owned(),
        default_timeout: Duration::from_secs(EXECUTION_TIMEOUT_SECONDS),
    });
    let state = AppState { executor };

    let addr = format!("0.0.0.0:{port}");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    rt.block_on(async move {
        let app = build_router(state)
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(REQUEST_TIMEOUT_SECONDS),
            ))
            .layer(CompressionLayer::new())
            .layer(ConcurrencyLimitLayer::new(DEFAULT_MAX_INFLIGHT))
            .layer(middleware::from_fn(log_request_response));

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        println!("listening on {addr}");
        axum::serve(listener, app).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
