//! Tonic server setup for the extension service
//!
//! Applies the configured message size limits, HTTP/2 keepalive and
//! graceful shutdown on an external flag. When a metrics address is
//! configured, an axum listener serves the Prometheus registry at
//! `/metrics` alongside the gRPC service.

use crate::{
    generated::media_graph_extension_server::MediaGraphExtensionServer,
    metrics::ServiceMetrics, service::MediaGraphExtensionService, ServiceConfig, ServiceError,
};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use mediagraph_core::{FrameDecoder, InferenceEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Server;
use tokio::net::TcpListener;
use tracing::{error, info};

/// gRPC server hosting the `MediaGraphExtension` service
pub struct GrpcServer {
    config: ServiceConfig,
    metrics: Arc<ServiceMetrics>,
    service: MediaGraphExtensionService,
}

impl GrpcServer {
    /// Create a server around the host's decoder and inference engine
    pub fn new(
        config: ServiceConfig,
        decoder: Arc<dyn FrameDecoder>,
        inference: Arc<dyn InferenceEngine>,
    ) -> Result<Self, ServiceError> {
        let metrics = Arc::new(ServiceMetrics::with_default_registry()?);
        let service = MediaGraphExtensionService::new(
            config.session.clone(),
            decoder,
            inference,
            Arc::clone(&metrics),
        )?;

        Ok(Self {
            config,
            metrics,
            service,
        })
    }

    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Tonic service with message limits applied
    pub fn service(&self) -> MediaGraphExtensionServer<MediaGraphExtensionService> {
        MediaGraphExtensionServer::new(self.service.clone())
            .max_decoding_message_size(self.config.max_message_bytes)
            .max_encoding_message_size(self.config.max_message_bytes)
    }

    fn builder() -> Server {
        Server::builder()
            // TCP keepalive to detect dead connections
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            // HTTP/2 keepalive ping to keep idle streams alive
            .http2_keepalive_interval(Some(Duration::from_secs(30)))
            .http2_keepalive_timeout(Some(Duration::from_secs(10)))
    }

    /// Run until `shutdown_flag` is set, then drain in-flight streams
    pub async fn serve_with_shutdown_flag(
        self,
        shutdown_flag: Arc<AtomicBool>,
    ) -> Result<(), ServiceError> {
        let addr = self.config.socket_addr()?;

        let metrics_task = match self.config.metrics_socket_addr()? {
            Some(metrics_addr) => {
                let listener = TcpListener::bind(metrics_addr).await?;
                info!(%metrics_addr, "Metrics endpoint listening");
                let router = metrics_router(self.metrics());
                let flag = Arc::clone(&shutdown_flag);
                Some(tokio::spawn(async move {
                    let result = axum::serve(listener, router)
                        .with_graceful_shutdown(wait_for_flag(flag))
                        .await;
                    if let Err(e) = result {
                        error!(error = %e, "Metrics endpoint failed");
                    }
                }))
            }
            None => None,
        };

        info!(
            %addr,
            batch_size = self.config.session.batch_size,
            allow_shared_memory = self.config.session.allow_shared_memory,
            max_message_bytes = self.config.max_message_bytes,
            "Starting gRPC server"
        );

        Self::builder()
            .trace_fn(|_| tracing::info_span!("grpc_request"))
            .add_service(self.service())
            .serve_with_shutdown(addr, async move {
                wait_for_flag(shutdown_flag).await;
                info!("Shutdown flag set, closing gRPC server");
            })
            .await?;

        if let Some(task) = metrics_task {
            let _ = task.await;
        }

        info!("gRPC server shutdown complete");
        Ok(())
    }
}

async fn wait_for_flag(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Router serving the Prometheus text exposition at `/metrics`
pub fn metrics_router(metrics: Arc<ServiceMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<ServiceMetrics>>) -> Response {
    match metrics.encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
