//! The `{statusCode, body}` wrapper written around every HTTP response.

use serde::{Deserialize, Serialize};

/// Fixed body returned for every internal failure. The real cause is only
/// ever written to the server log.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Response envelope carrying the HTTP status alongside the payload.
///
/// `status_code` always mirrors the status line actually written. Success
/// responses carry the handler output as `body`; error responses carry the
/// plain reason string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// HTTP status code of the response.
    pub status_code: u16,
    /// Success payload or error reason.
    pub body: T,
}

impl<T> Envelope<T> {
    /// Wraps a successful handler output with status 200.
    pub fn ok(body: T) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }
}

impl Envelope<String> {
    /// Wraps an error reason with the given status.
    #[must_use]
    pub fn error(status_code: u16, reason: impl Into<String>) -> Self {
        Self {
            status_code,
            body: reason.into(),
        }
    }
}
