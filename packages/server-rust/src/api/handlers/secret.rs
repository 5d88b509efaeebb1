//! `GET /secret?secretId=<id>` handler.

use std::sync::Arc;

use tracing::info;
use vsock_proxy_core::{ApiError, GetSecretRequest, GetSecretResponse};

use crate::api::dispatch::{ApiHandler, RequestContext};
use crate::traits::{SecretStore, StoreError};

/// Builds the handler that reads `secret_id` from `store`.
///
/// An empty id is rejected before the store is consulted. A store-reported
/// miss becomes `NotFound`; every other store failure is `Internal`.
pub fn get_secret_handler(
    store: Arc<dyn SecretStore>,
) -> impl ApiHandler<GetSecretRequest, GetSecretResponse> {
    move |_ctx: RequestContext, req: GetSecretRequest| {
        let store = Arc::clone(&store);
        async move {
            if req.secret_id.is_empty() {
                return Err(ApiError::bad_request("secretId is required"));
            }
            info!(secret_id = %req.secret_id, "retrieving secret");

            match store.get_secret(&req.secret_id).await {
                Ok(value) => Ok(GetSecretResponse {
                    value: value.into_string(),
                }),
                Err(StoreError::NotFound(_)) => Err(ApiError::not_found(format!(
                    "secret not found: {}",
                    req.secret_id
                ))),
                Err(StoreError::Backend(e)) => Err(ApiError::Internal(
                    e.context(format!("getting secret {}", req.secret_id)),
                )),
            }
        }
    }
}
