//! Request surface: typed dispatch, route table and built-in endpoints.

pub mod dispatch;
pub mod handlers;
pub mod router;

use std::sync::Arc;

use axum::http::Method;

pub use dispatch::{ApiHandler, Dispatcher, RequestContext, DEFAULT_MAX_BODY_BYTES};
pub use router::{RouteError, RouteTable};

use crate::network::ServerConfig;
use crate::traits::{ObjectStore, SecretStore};

/// External collaborators the built-in handlers depend on.
#[derive(Clone)]
pub struct Collaborators {
    pub secrets: Arc<dyn SecretStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Registers the built-in endpoints.
///
/// | Method | Path      | Input               | Output               |
/// |--------|-----------|---------------------|----------------------|
/// | GET    | `/`       | ignored             | `HealthResponse`     |
/// | GET    | `/secret` | `GetSecretRequest`  | `GetSecretResponse`  |
/// | POST   | `/upload` | `UploadFileRequest` | `UploadFileResponse` |
///
/// # Errors
///
/// Only fails if the table itself rejects a registration, which would be a
/// programming error in this function.
pub fn build_route_table(
    collaborators: &Collaborators,
    config: &ServerConfig,
) -> Result<RouteTable, RouteError> {
    let limit = config.max_body_bytes;
    let mut table = RouteTable::new();
    table
        .register(
            Method::GET,
            "/",
            Dispatcher::new(handlers::health_handler).with_body_limit(limit),
        )?
        .register(
            Method::GET,
            "/secret",
            Dispatcher::new(handlers::get_secret_handler(Arc::clone(
                &collaborators.secrets,
            )))
            .with_body_limit(limit),
        )?
        .register(
            Method::POST,
            "/upload",
            Dispatcher::new(handlers::upload_file_handler(Arc::clone(
                &collaborators.objects,
            )))
            .with_body_limit(limit),
        )?;
    Ok(table)
}
