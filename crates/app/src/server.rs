use axum::Router;
use axum::body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use pyrun::{ExecutionRequest, ExecutionResult, Executor, merged_output};

pub const MAX_CODE_BODY_BYTES: usize = 1024 * 1024;

const INVALID_REQUEST_BODY: &str = "Invalid request: missing \"code\" in JSON body";
// Historical message text, kept verbatim even though the enforced limit
// defaults to 60 seconds.
const TIMEOUT_BODY: &str = "Execution timed out after 30 seconds.";

#[derive(Clone)]
pub struct AppState {
    pub executor: Executor,
}

#[derive(Debug, Deserialize)]
struct ExecuteBody {
    code: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(execute_code).with_state(state)
}

/// Single handler for every path: OPTIONS gets the CORS preflight, anything
/// else is treated as an execute request, matching the original endpoint.
async fn execute_code(State(state): State<AppState>, request: Request) -> Response {
    if request.method() == Method::OPTIONS {
        return preflight_response();
    }

    let bytes = match body::to_bytes(request.into_body(), MAX_CODE_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return respond(StatusCode::BAD_REQUEST, INVALID_REQUEST_BODY.to_owned()),
    };
    let payload: ExecuteBody = match serde_json::from_slice(&bytes) {
        Ok(payload) => payload,
        Err(_) => return respond(StatusCode::BAD_REQUEST, INVALID_REQUEST_BODY.to_owned()),
    };
    let execution = match ExecutionRequest::new(payload.code) {
        Ok(execution) => execution,
        Err(_) => return respond(StatusCode::BAD_REQUEST, INVALID_REQUEST_BODY.to_owned()),
    };

    match state.executor.run(&execution).await {
        ExecutionResult::Completed { stdout, stderr } => {
            respond(StatusCode::OK, merged_output(&stdout, &stderr))
        }
        ExecutionResult::TimedOut => respond(StatusCode::REQUEST_TIMEOUT, TIMEOUT_BODY.to_owned()),
        ExecutionResult::LaunchFailed { cause } => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("An error occurred: {cause}"),
        ),
    }
}

fn respond(status: StatusCode, body: String) -> Response {
    let mut response = (status, body).into_response();
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

fn preflight_response() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("3600"),
    );
    response
}
