//! HTTP middleware stack applied to every route.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed processes the request first on the way in, and the response
//! last on the way out.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::HeaderName;
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::RequestBodyTimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::config::ServerConfig;
use super::shutdown::LifecycleController;
use crate::api::dispatch::error_response;

/// Reason sent when a response misses the write deadline.
pub const WRITE_TIMEOUT_MESSAGE: &str = "Request timed out";

/// Header carrying the per-request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Wraps `router` in the server's middleware stack.
///
/// **Ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `x-request-id` to every request
/// 2. `Tracing` -- request/response trace spans
/// 3. In-flight tracking -- counts the request until its response is built
/// 4. Write timeout -- enveloped 503 when the response is not produced within
///    `write_timeout`
/// 5. `RequestBodyTimeout` -- bounds body reception by `read_timeout`
/// 6. `PropagateRequestId` -- copies `x-request-id` onto the response
pub fn apply_http_layers(
    router: Router,
    config: &ServerConfig,
    lifecycle: Arc<LifecycleController>,
) -> Router {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(from_fn_with_state(lifecycle, track_in_flight))
            .layer(from_fn_with_state(config.write_timeout, enforce_write_timeout))
            .layer(RequestBodyTimeoutLayer::new(config.read_timeout))
            .layer(PropagateRequestIdLayer::new(x_request_id)),
    )
}

async fn track_in_flight(
    State(lifecycle): State<Arc<LifecycleController>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = lifecycle.in_flight_guard();
    next.run(request).await
}

async fn enforce_write_timeout(
    State(limit): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(timeout = ?limit, "response not produced before write timeout");
            error_response(StatusCode::SERVICE_UNAVAILABLE, WRITE_TIMEOUT_MESSAGE)
        }
    }
}
