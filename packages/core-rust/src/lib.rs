//! vsock-proxy core: the response envelope, the handler error taxonomy, and
//! the payloads of the built-in endpoints.

pub mod envelope;
pub mod error;
pub mod messages;

pub use envelope::{Envelope, INTERNAL_ERROR_MESSAGE};
pub use error::{ApiError, ApiResult};
pub use messages::{
    GetSecretRequest, GetSecretResponse, HealthResponse, UploadFileRequest, UploadFileResponse,
};
