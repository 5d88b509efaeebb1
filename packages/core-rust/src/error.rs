//! Error taxonomy shared by every handler.
//!
//! Handlers return [`ApiError`]; the dispatcher is the only place that maps
//! a kind to an HTTP status.

/// Result alias for handler outputs.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors a handler may return.
///
/// `BadRequest` and `NotFound` reasons are echoed to the caller. `Internal`
/// carries the wrapped cause, which is logged and replaced by a generic
/// message on the wire.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Client input is missing or malformed.
    #[error("{0}")]
    BadRequest(String),
    /// The referenced resource does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Any other failure, including recovered handler panics.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Builds a `BadRequest` error.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest(reason.into())
    }

    /// Builds a `NotFound` error.
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound(reason.into())
    }

    /// Builds an `Internal` error from a displayable message.
    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::Internal(anyhow::anyhow!("{message}"))
    }

    /// HTTP status code for this error kind.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::Internal(_) => 500,
        }
    }

    /// Reason safe to expose to the caller.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::BadRequest(reason) | Self::NotFound(reason) => reason,
            Self::Internal(_) => crate::envelope::INTERNAL_ERROR_MESSAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kinds_map_to_status_codes() {
        assert_eq!(ApiError::bad_request("x").status_code(), 400);
        assert_eq!(ApiError::not_found("x").status_code(), 404);
        assert_eq!(ApiError::internal("x").status_code(), 500);
    }

    #[test]
    fn client_kinds_expose_their_reason() {
        assert_eq!(ApiError::bad_request("key is required").reason(), "key is required");
        assert_eq!(ApiError::not_found("secret not found: a").reason(), "secret not found: a");
    }

    #[test]
    fn internal_reason_hides_cause() {
        let cause: Result<(), anyhow::Error> = Err(anyhow::anyhow!("connection reset"));
        let err = ApiError::from(cause.context("uploading file").unwrap_err());
        assert_eq!(err.reason(), "Internal server error");
        assert!(format!("{err:#}").contains("connection reset"));
    }
}
