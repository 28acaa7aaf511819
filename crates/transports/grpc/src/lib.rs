//! gRPC transport for MediaGraph extension sessions
//!
//! Exposes the `MediaGraphExtension.ProcessMediaStream` bidirectional RPC
//! and runs one [`mediagraph_core::SessionEngine`] session per call.
//!
//! # Modules
//!
//! - [`generated`]: prost/tonic types compiled from `protos/mediagraph.proto`
//! - [`adapters`]: wire ⇄ session message conversion and status mapping
//! - [`service`]: the tonic service implementation
//! - [`metrics`]: Prometheus collectors and instrumented collaborators
//! - [`server`]: server builder with message limits and graceful shutdown

pub mod adapters;
pub mod metrics;
pub mod server;
pub mod service;

/// Generated protobuf and service types
pub mod generated {
    tonic::include_proto!("mediagraph.v1");
}

pub use generated::media_graph_extension_server::{
    MediaGraphExtension, MediaGraphExtensionServer,
};
pub use metrics::ServiceMetrics;
pub use server::GrpcServer;
pub use service::MediaGraphExtensionService;

use mediagraph_core::config::parse_var;
use mediagraph_core::SessionConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Errors raised while configuring or running the server
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] mediagraph_core::Error),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Largest encoded or decoded gRPC message, in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logging: bool,

    /// Address for the Prometheus `/metrics` endpoint; disabled when unset
    #[serde(default)]
    pub metrics_bind_address: Option<String>,

    #[serde(default)]
    pub session: SessionConfig,
}

fn default_bind_address() -> String {
    "0.0.0.0:5001".to_string()
}

fn default_max_message_bytes() -> usize {
    32 * 1024 * 1024 // raw 4K BGR frames inline
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_message_bytes: default_max_message_bytes(),
            json_logging: false,
            metrics_bind_address: None,
            session: SessionConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    ///
    /// Session settings live under a `[session]` table.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ServiceError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ServiceError::Config(format!("failed to read {}: {}", path.as_ref().display(), e))
        })?;
        let config: ServiceConfig =
            toml::from_str(&content).map_err(|e| ServiceError::Config(e.to_string()))?;
        config.session.validate()?;
        Ok(config)
    }

    /// Load configuration from `MEDIAGRAPH_*` environment variables
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from a variable lookup; malformed values are errors
    pub fn from_vars<F>(lookup: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ServiceConfig {
            session: SessionConfig::from_vars(&lookup)?,
            ..Default::default()
        };

        if let Some(addr) = lookup("MEDIAGRAPH_BIND_ADDRESS") {
            config.bind_address = addr;
        }
        if let Some(max) = parse_var(&lookup, "MEDIAGRAPH_MAX_MESSAGE_BYTES")? {
            config.max_message_bytes = max;
        }
        if let Some(json) = parse_var(&lookup, "MEDIAGRAPH_JSON_LOGS")? {
            config.json_logging = json;
        }
        if let Some(addr) = lookup("MEDIAGRAPH_METRICS_BIND_ADDRESS") {
            config.metrics_bind_address = Some(addr);
        }

        Ok(config)
    }

    /// Load configuration from file if given, otherwise from environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ServiceError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::from_env(),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ServiceError> {
        parse_addr(&self.bind_address)
    }

    /// Metrics endpoint address, if one is configured
    pub fn metrics_socket_addr(&self) -> Result<Option<SocketAddr>, ServiceError> {
        self.metrics_bind_address.as_deref().map(parse_addr).transpose()
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, ServiceError> {
    addr.parse()
        .map_err(|_| ServiceError::InvalidBindAddress(addr.to_string()))
}

/// Install the global tracing subscriber
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once;
/// later calls are ignored.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
}
