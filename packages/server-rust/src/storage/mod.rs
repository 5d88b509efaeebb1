//! Backends for the secret and object store collaborators.

#[cfg(feature = "aws")]
pub mod aws;
pub mod memory;

#[cfg(feature = "aws")]
pub use aws::{AwsObjectStore, AwsSecretStore};
pub use memory::{MemoryObjectStore, MemorySecretStore, StoredObject};
