//! Process-local stores backed by `DashMap`.
//!
//! Used for local development and tests: nothing leaves the process.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::traits::{ObjectStore, PutObject, SecretStore, SecretValue, StoreError};

/// Secret store holding values in memory.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: DashMap<String, SecretValue>,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store preloaded with text secrets.
    pub fn with_secrets<I, K, V>(secrets: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (id, value) in secrets {
            store.insert(id, SecretValue::Text(value.into()));
        }
        store
    }

    /// Inserts or replaces a secret.
    pub fn insert(&self, id: impl Into<String>, value: SecretValue) {
        self.secrets.insert(id.into(), value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, secret_id: &str) -> Result<SecretValue, StoreError> {
        self.secrets
            .get(secret_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("secret {secret_id}")))
    }
}

/// An object held by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Object store keeping objects in memory, keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<(String, String), StoredObject>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the object stored under `bucket`/`key`.
    #[must_use]
    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, object: PutObject) -> Result<(), StoreError> {
        self.objects.insert(
            (object.bucket, object.key),
            StoredObject {
                content_type: object.content_type,
                data: object.data,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preloaded_secret_is_returned() {
        let store = MemorySecretStore::with_secrets([("db", "hunter2")]);
        let value = store.get_secret("db").await.unwrap();
        assert_eq!(value, SecretValue::Text("hunter2".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn unknown_secret_is_not_found() {
        let store = MemorySecretStore::new();
        let err = store.get_secret("missing-id").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn binary_secret_converts_lossily() {
        let value = SecretValue::Binary(vec![b'o', b'k', 0xff]);
        assert_eq!(value.into_string(), "ok\u{fffd}");
    }

    #[tokio::test]
    async fn put_object_replaces_existing_key() {
        let store = MemoryObjectStore::new();
        for data in ["first", "second"] {
            store
                .put_object(PutObject {
                    bucket: "b".to_string(),
                    key: "/k".to_string(),
                    content_type: None,
                    data: Bytes::from_static(data.as_bytes()),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.len(), 1);
        let stored = store.get("b", "/k").unwrap();
        assert_eq!(&stored.data[..], b"second");
    }
}
