//! `POST /upload` handler.

use std::sync::Arc;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use tracing::info;
use vsock_proxy_core::{ApiError, UploadFileRequest, UploadFileResponse};

use crate::api::dispatch::{ApiHandler, RequestContext};
use crate::traits::{ObjectStore, PutObject};

/// Builds the handler that writes a base64 payload to `store`.
///
/// `bucket`, `key` and `data` are checked in that order, then `data` is
/// decoded; the store is only called once all of that succeeds.
pub fn upload_file_handler(
    store: Arc<dyn ObjectStore>,
) -> impl ApiHandler<UploadFileRequest, UploadFileResponse> {
    move |_ctx: RequestContext, req: UploadFileRequest| {
        let store = Arc::clone(&store);
        async move {
            if req.bucket.is_empty() {
                return Err(ApiError::bad_request("bucket is required"));
            }
            if req.key.is_empty() {
                return Err(ApiError::bad_request("key is required"));
            }
            if req.data.is_empty() {
                return Err(ApiError::bad_request("data is required"));
            }

            let data = BASE64
                .decode(req.data.as_bytes())
                .map_err(|e| ApiError::bad_request(format!("invalid base64 data: {e}")))?;

            info!(
                bucket = %req.bucket,
                key = %req.key,
                content_type = %req.content_type,
                data_length = data.len(),
                "uploading file"
            );

            let location = format!("{}/{}", req.bucket, req.key);
            let content_type = (!req.content_type.is_empty()).then_some(req.content_type);
            store
                .put_object(PutObject {
                    bucket: req.bucket,
                    key: req.key,
                    content_type,
                    data: Bytes::from(data),
                })
                .await
                .map_err(anyhow::Error::new)
                .with_context(|| format!("uploading file to {location}"))?;

            Ok(UploadFileResponse {})
        }
    }
}
