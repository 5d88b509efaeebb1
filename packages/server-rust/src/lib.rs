//! vsock-proxy server: an enclave control-plane HTTP service.
//!
//! Listens on a vsock port when the host supports it and falls back to TCP
//! otherwise. Every endpoint is a typed handler behind the generic
//! [`api::Dispatcher`], which owns decoding, panic containment, error
//! classification and the `{statusCode, body}` envelope.

pub mod api;
pub mod logging;
pub mod network;
pub mod run;
pub mod storage;
pub mod traits;

pub use api::{build_route_table, Collaborators, Dispatcher, RouteTable};
pub use network::{LifecycleController, LifecycleState, NetworkModule, ServerConfig};
pub use run::run;
pub use traits::{ObjectStore, SecretStore, StoreError};
