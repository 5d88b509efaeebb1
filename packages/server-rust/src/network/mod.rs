//! Transport acquisition, HTTP middleware, configuration and lifecycle control.

pub mod config;
pub mod middleware;
pub mod module;
pub mod shutdown;
pub mod transport;

pub use config::*;
pub use middleware::{apply_http_layers, REQUEST_ID_HEADER, WRITE_TIMEOUT_MESSAGE};
pub use module::NetworkModule;
pub use shutdown::*;
pub use transport::{
    acquire_listener, acquire_listener_with, SystemVsock, TransportAddr, TransportError,
    TransportListener, TransportStream, VsockBackend,
};
