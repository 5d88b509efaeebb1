//! Server configuration, loaded once from the environment at startup.

use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration")]
    Invalid(#[from] clap::Error),
    #[error("store backend {0:?} is not available in this build")]
    BackendUnavailable(StoreBackend),
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable multi-line output for local runs.
    Pretty,
}

/// Backend serving the secret and object store collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Process-local maps. Nothing leaves the enclave.
    Memory,
    /// AWS Secrets Manager and S3 (requires the `aws` feature).
    Aws,
}

impl StoreBackend {
    #[cfg(feature = "aws")]
    const DEFAULT: &'static str = "aws";
    #[cfg(not(feature = "aws"))]
    const DEFAULT: &'static str = "memory";
}

/// Immutable server configuration.
///
/// Every field is read from an environment variable. Command-line arguments
/// are not consulted; `clap` only supplies env parsing, defaults and
/// validation.
#[derive(Debug, Clone, Parser)]
#[command(name = "vsock-proxy", about = "Enclave control-plane server over vsock")]
pub struct ServerConfig {
    /// Port to listen on (vsock port, or TCP port on fallback).
    #[arg(env = "SERVER_PORT", default_value_t = 8080)]
    pub server_port: u32,

    /// Maximum time allowed for receiving a request body.
    #[arg(env = "READ_TIMEOUT", default_value = "3s", value_parser = parse_duration)]
    pub read_timeout: Duration,

    /// Maximum time allowed for producing a response. Also bounds the drain.
    #[arg(env = "WRITE_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub write_timeout: Duration,

    /// Log output format.
    #[arg(env = "LOG_FORMAT", value_enum, default_value = "json")]
    pub log_format: LogFormat,

    /// Which backend serves `/secret` and `/upload`.
    #[arg(env = "STORE_BACKEND", value_enum, default_value = StoreBackend::DEFAULT)]
    pub store_backend: StoreBackend,

    /// Request body size limit in bytes.
    #[arg(env = "MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,

    /// `id=value` pairs preloaded into the memory secret store.
    #[arg(env = "SEED_SECRETS", value_delimiter = ',', value_parser = parse_seed_secret)]
    pub seed_secrets: Vec<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_port: 8080,
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(10),
            log_format: LogFormat::Json,
            store_backend: StoreBackend::Memory,
            max_body_bytes: 10 * 1024 * 1024,
            seed_secrets: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first invalid value.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::try_parse_from(["vsock-proxy"])?)
    }
}

/// Parses a Go-style duration literal such as `3s`, `250ms` or `1m30s`.
///
/// # Errors
///
/// Returns a description of the first malformed component.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if digits == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("invalid duration {input:?}: {e}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let component = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        total = total.saturating_add(component);
        rest = &rest[unit_len..];
    }
    Ok(total)
}

fn parse_seed_secret(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((id, value)) if !id.is_empty() => Ok((id.to_string(), value.to_string())),
        _ => Err(format!("expected id=value, got {input:?}")),
    }
}
