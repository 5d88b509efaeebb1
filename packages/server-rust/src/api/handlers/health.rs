//! `GET /` liveness handler.

use serde::de::IgnoredAny;
use tracing::info;
use vsock_proxy_core::{ApiResult, HealthResponse};

use crate::api::dispatch::RequestContext;

/// Always reports healthy. Any input is accepted and ignored.
#[allow(clippy::unused_async)]
pub async fn health_handler(_ctx: RequestContext, _input: IgnoredAny) -> ApiResult<HealthResponse> {
    info!("received health check");
    Ok(HealthResponse::healthy())
}
