//! Static route table: `(method, path)` -> dispatcher.
//!
//! Built once at startup, then frozen into an axum [`Router`]. Requests that
//! match no entry get axum's default empty 404, which is distinct from the
//! enveloped 404 a handler produces with `ApiError::NotFound`.

use std::collections::BTreeMap;

use axum::http::Method;
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::dispatch::{ApiHandler, Dispatcher};

/// Errors raised while registering routes.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("method {0} cannot be routed")]
    UnsupportedMethod(Method),
    #[error("route {method} {path} is already registered")]
    Duplicate { method: Method, path: &'static str },
}

/// Ordered collection of registered routes.
#[derive(Default)]
pub struct RouteTable {
    entries: Vec<(Method, &'static str)>,
    paths: BTreeMap<&'static str, MethodRouter>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `dispatcher` for `method` on `path`.
    ///
    /// # Errors
    ///
    /// Fails for methods axum cannot filter on (e.g. `CONNECT` variants) and
    /// for a `(method, path)` pair that is already registered.
    pub fn register<H, I, O>(
        &mut self,
        method: Method,
        path: &'static str,
        dispatcher: Dispatcher<H, I, O>,
    ) -> Result<&mut Self, RouteError>
    where
        H: ApiHandler<I, O>,
        I: DeserializeOwned + Default + Send + 'static,
        O: Serialize + Send + 'static,
    {
        if self.contains(&method, path) {
            return Err(RouteError::Duplicate { method, path });
        }
        let filter = MethodFilter::try_from(method.clone())
            .map_err(|_| RouteError::UnsupportedMethod(method.clone()))?;

        let endpoint = self.paths.remove(path).unwrap_or_else(MethodRouter::new);
        self.paths.insert(path, endpoint.on_service(filter, dispatcher));
        self.entries.push((method, path));
        Ok(self)
    }

    /// Whether `(method, path)` is registered.
    #[must_use]
    pub fn contains(&self, method: &Method, path: &str) -> bool {
        self.entries
            .iter()
            .any(|(m, p)| m == method && *p == path)
    }

    /// Registered routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &'static str)> {
        self.entries.iter().map(|(method, path)| (method, *path))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the table into an axum router.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.paths
            .into_iter()
            .fold(Router::new(), |router, (path, endpoint)| router.route(path, endpoint))
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}
