//! Request and response payloads of the built-in endpoints.
//!
//! Field names are camelCase on the wire. Every request type implements
//! `Default` so that an empty body decodes to a zero-valued input.

use serde::{Deserialize, Serialize};

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// Input of `GET /secret`, normally decoded from the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetSecretRequest {
    pub secret_id: String,
}

/// Body of a successful `GET /secret`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSecretResponse {
    pub value: String,
}

/// Input of `POST /upload`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadFileRequest {
    /// Target bucket. Required.
    pub bucket: String,
    /// Object key (absolute path). Required.
    pub key: String,
    /// MIME type; forwarded only when non-empty.
    pub content_type: String,
    /// Standard base64 encoded object contents. Required.
    pub data: String,
}

/// Body of a successful `POST /upload`; serialises as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFileResponse {}
