//! Process wiring: configuration, logging, collaborators, signals, serving.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{build_route_table, Collaborators};
use crate::logging;
use crate::network::{ConfigError, NetworkModule, ServerConfig, StoreBackend};
use crate::storage::{MemoryObjectStore, MemorySecretStore};

/// Loads the configuration from the environment and runs the server until a
/// termination signal arrives.
///
/// # Errors
///
/// Returns the first startup failure (configuration, logging, listener,
/// collaborators) or a fatal serving error.
pub async fn run() -> anyhow::Result<()> {
    let config = ServerConfig::load().context("loading configuration")?;
    logging::init(config.log_format)?;
    run_with_config(config).await
}

/// Runs the server with an explicit configuration. The global subscriber is
/// expected to be installed already (or intentionally absent).
///
/// # Errors
///
/// See [`run`].
pub async fn run_with_config(config: ServerConfig) -> anyhow::Result<()> {
    info!(
        port = config.server_port,
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        store_backend = ?config.store_backend,
        "starting server"
    );

    let collaborators = build_collaborators(&config).await?;
    let routes = build_route_table(&collaborators, &config).context("registering routes")?;

    let port = config.server_port;
    let mut module = NetworkModule::new(config);
    module
        .start()
        .await
        .with_context(|| format!("listening on port {port}"))?;

    let watcher = tokio::spawn(watch_signals(module.lifecycle().root_token()));
    let served = module.serve(routes).await;
    watcher.abort();
    served
}

/// Builds the collaborators selected by `STORE_BACKEND`.
///
/// # Errors
///
/// Fails when the AWS backend is requested in a build without the `aws`
/// feature.
pub async fn build_collaborators(config: &ServerConfig) -> Result<Collaborators, ConfigError> {
    match config.store_backend {
        StoreBackend::Memory => Ok(Collaborators {
            secrets: Arc::new(MemorySecretStore::with_secrets(
                config.seed_secrets.iter().cloned(),
            )),
            objects: Arc::new(MemoryObjectStore::new()),
        }),
        StoreBackend::Aws => aws_collaborators().await,
    }
}

#[cfg(feature = "aws")]
async fn aws_collaborators() -> Result<Collaborators, ConfigError> {
    use crate::storage::{AwsObjectStore, AwsSecretStore};

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    Ok(Collaborators {
        secrets: Arc::new(AwsSecretStore::new(&sdk_config)),
        objects: Arc::new(AwsObjectStore::new(&sdk_config)),
    })
}

#[cfg(not(feature = "aws"))]
#[allow(clippy::unused_async)]
async fn aws_collaborators() -> Result<Collaborators, ConfigError> {
    Err(ConfigError::BackendUnavailable(StoreBackend::Aws))
}

/// Cancels `token` on SIGINT or SIGTERM. Returns early if the token is
/// cancelled by someone else.
pub async fn watch_signals(token: CancellationToken) {
    tokio::select! {
        signal = termination_signal() => {
            info!(signal, "received termination signal");
            token.cancel();
        }
        () = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            return interrupt().await;
        }
    };
    tokio::select! {
        name = interrupt() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    interrupt().await
}

async fn interrupt() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::traits::SecretValue;

    #[tokio::test]
    async fn memory_backend_is_seeded() {
        let config = ServerConfig {
            seed_secrets: vec![("db".to_string(), "pw".to_string())],
            ..ServerConfig::default()
        };
        let collaborators = build_collaborators(&config).await.unwrap();
        let value = collaborators.secrets.get_secret("db").await.unwrap();
        assert_eq!(value, SecretValue::Text("pw".to_string()));
    }

    #[cfg(not(feature = "aws"))]
    #[tokio::test]
    async fn aws_backend_requires_feature() {
        let config = ServerConfig {
            store_backend: StoreBackend::Aws,
            ..ServerConfig::default()
        };
        let err = build_collaborators(&config).await.unwrap_err();
        assert!(matches!(err, ConfigError::BackendUnavailable(StoreBackend::Aws)));
    }

    #[tokio::test]
    async fn watcher_exits_when_token_is_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let watcher = tokio::spawn(watch_signals(token.clone()));
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn configured_server_stops_on_cancellation() {
        // Port 0 lets the TCP fallback pick a free port where vsock is absent.
        let config = ServerConfig {
            server_port: 0,
            write_timeout: Duration::from_millis(200),
            ..ServerConfig::default()
        };
        let mut module = NetworkModule::new(config.clone());
        module.start().await.unwrap();
        let lifecycle = module.lifecycle();
        let collaborators = build_collaborators(&config).await.unwrap();
        let routes = build_route_table(&collaborators, &config).unwrap();

        let server = tokio::spawn(module.serve(routes));
        lifecycle.trigger_shutdown();
        server.await.unwrap().unwrap();
    }
}
