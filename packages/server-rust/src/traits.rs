//! Collaborator seams: the secret and object stores the handlers call.

use async_trait::async_trait;
use bytes::Bytes;

/// Failure reported by a backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced secret or object does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Any other backend failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A secret as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretValue {
    Text(String),
    Binary(Vec<u8>),
}

impl SecretValue {
    /// Text form of the secret. Binary secrets are decoded as UTF-8, with
    /// invalid sequences replaced.
    #[must_use]
    pub fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

/// Read-only access to a secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the current value of `secret_id`.
    async fn get_secret(&self, secret_id: &str) -> Result<SecretValue, StoreError>;
}

/// A single object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    pub bucket: String,
    pub key: String,
    /// Forwarded to the backend only when present.
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Write access to an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `object`, replacing any existing object under the same key.
    async fn put_object(&self, object: PutObject) -> Result<(), StoreError>;
}
