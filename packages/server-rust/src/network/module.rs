//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates the lifecycle controller, `start()` acquires the
//! listener (vsock, or TCP as a fallback) and `serve()` accepts connections
//! until the root token is cancelled. Other components can grab the
//! controller between `start()` and `serve()`, e.g. the signal watcher.

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::{bail, Context};
use axum::Router;
use tracing::{info, warn};

use super::config::ServerConfig;
use super::middleware::apply_http_layers;
use super::shutdown::LifecycleController;
use super::transport::{acquire_listener, TransportAddr, TransportError, TransportListener};
use crate::api::RouteTable;

/// Owns the listener and drives the server through its lifecycle.
///
/// 1. `new()` -- state is `Starting`, nothing is bound
/// 2. `start()` -- acquires the listener
/// 3. `serve()` -- `Serving` until cancellation, then `Draining`, then `Stopped`
#[derive(Debug)]
pub struct NetworkModule {
    config: ServerConfig,
    listener: Option<TransportListener>,
    lifecycle: Arc<LifecycleController>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            listener: None,
            lifecycle: Arc::new(LifecycleController::new()),
        }
    }

    /// Shared lifecycle controller.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<LifecycleController> {
        Arc::clone(&self.lifecycle)
    }

    /// Acquires the listener on the configured port and returns its address.
    ///
    /// # Errors
    ///
    /// Returns the transport error when neither vsock nor the TCP fallback
    /// could be bound.
    pub async fn start(&mut self) -> Result<TransportAddr, TransportError> {
        let listener = acquire_listener(self.config.server_port).await?;
        let addr = listener.local_addr().map_err(TransportError::LocalAddr)?;
        info!(transport = listener.kind(), %addr, "listener acquired");
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Uses an already-bound listener instead of calling `start()`.
    pub fn attach_listener(&mut self, listener: TransportListener) {
        self.listener = Some(listener);
    }

    /// Wraps the route table in the middleware stack.
    #[must_use]
    pub fn build_router(&self, routes: RouteTable) -> Router {
        apply_http_layers(routes.into_router(), &self.config, Arc::clone(&self.lifecycle))
    }

    /// Serves `routes` until the root token is cancelled.
    ///
    /// On cancellation the listener is closed, so new connections are
    /// refused, and in-flight requests get up to `write_timeout` to finish.
    /// Requests still running after that are abandoned with a warning.
    ///
    /// # Errors
    ///
    /// Fails if `start()` was not called, or if the server hits a fatal I/O
    /// error.
    pub async fn serve(mut self, routes: RouteTable) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            bail!("start() must be called before serve()");
        };
        let router = self.build_router(routes);
        let lifecycle = self.lifecycle;
        let drain_timeout = self.config.write_timeout;

        let addr = listener.local_addr().context("reading listener address")?;
        lifecycle.set_serving();
        info!(transport = listener.kind(), %addr, "server started");

        let shutdown = {
            let lifecycle = Arc::clone(&lifecycle);
            async move {
                lifecycle.cancelled().await;
                lifecycle.begin_drain();
                info!(
                    in_flight = lifecycle.in_flight_count(),
                    "shutting down server"
                );
            }
        };
        let server = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .into_future();
        let drain_deadline = async {
            lifecycle.cancelled().await;
            tokio::time::sleep(drain_timeout).await;
        };

        tokio::select! {
            result = server => result.context("serving requests")?,
            () = drain_deadline => {
                warn!(
                    in_flight = lifecycle.in_flight_count(),
                    timeout = ?drain_timeout,
                    "drain timeout expired with requests still in flight"
                );
            }
        }

        lifecycle.set_stopped();
        info!("server terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::Method;
    use serde::de::IgnoredAny;
    use tokio::net::{TcpListener, TcpStream};
    use vsock_proxy_core::ApiResult;

    use crate::api::{Dispatcher, RequestContext};
    use crate::network::LifecycleState;

    async fn slow(_ctx: RequestContext, _input: IgnoredAny) -> ApiResult<&'static str> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok("done")
    }

    fn slow_routes() -> RouteTable {
        let mut table = RouteTable::new();
        table
            .register(Method::GET, "/slow", Dispatcher::new(slow))
            .unwrap();
        table
    }

    async fn local_module() -> (NetworkModule, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut module = NetworkModule::new(ServerConfig::default());
        module.attach_listener(TransportListener::Tcp(listener));
        (module, addr)
    }

    #[test]
    fn new_module_is_starting() {
        let module = NetworkModule::new(ServerConfig::default());
        assert!(module.listener.is_none());
        assert_eq!(module.lifecycle().state(), LifecycleState::Starting);
    }

    #[test]
    fn lifecycle_is_shared() {
        let module = NetworkModule::new(ServerConfig::default());
        assert!(Arc::ptr_eq(&module.lifecycle(), &module.lifecycle()));
    }

    #[tokio::test]
    async fn serve_without_start_fails() {
        let module = NetworkModule::new(ServerConfig::default());
        let err = module.serve(RouteTable::new()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_and_refuses_new_connections() {
        let (module, addr) = local_module().await;
        let lifecycle = module.lifecycle();
        let server = tokio::spawn(module.serve(slow_routes()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lifecycle.state(), LifecycleState::Serving);

        let request = tokio::spawn(reqwest::get(format!("http://{addr}/slow")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        lifecycle.trigger_shutdown();

        // The slow request is still running: draining, and the listener is gone.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
        assert_eq!(lifecycle.in_flight_count(), 1);
        assert!(TcpStream::connect(addr).await.is_err());
        assert!(!request.is_finished());

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({"statusCode": 200, "body": "done"}));

        server.await.unwrap().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn cancellation_before_any_request_stops_cleanly() {
        let (module, _addr) = local_module().await;
        let lifecycle = module.lifecycle();
        lifecycle.trigger_shutdown();

        module.serve(slow_routes()).await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }
}
