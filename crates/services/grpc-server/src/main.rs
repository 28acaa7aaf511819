//! gRPC server binary entry point
//!
//! Starts a MediaGraph extension endpoint that accepts `ProcessMediaStream`
//! sessions from a media graph host.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:5001, batch size 1)
//! cargo run -p mediagraph-grpc-server
//!
//! # Batch four frames per inference and flush the trailing batch on close
//! cargo run -p mediagraph-grpc-server -- --batch-size 4 --flush-partial-batch
//!
//! # Load a TOML config, embedded transfer only, JSON logs
//! cargo run -p mediagraph-grpc-server -- \
//!   --config ./mediagraph.toml \
//!   --disable-shared-memory \
//!   --json-logs
//!
//! # Expose Prometheus metrics on :9090/metrics
//! cargo run -p mediagraph-grpc-server -- --metrics-bind-address 0.0.0.0:9090
//! ```
//!
//! Every flag also reads a `MEDIAGRAPH_*` environment variable. `RUST_LOG`
//! controls the log level (default `info`).

mod collaborators;

use clap::Parser;
use collaborators::{MeanIntensityClassifier, RawFrameDecoder};
use mediagraph_grpc::{init_tracing, GrpcServer, ServiceConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// MediaGraph extension gRPC server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; flags below override its values
    #[arg(short, long, env = "MEDIAGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "MEDIAGRAPH_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Frames per inference call
    #[arg(short, long, env = "MEDIAGRAPH_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Directory under which shared memory handle names are resolved
    #[arg(long, env = "MEDIAGRAPH_SHARED_MEMORY_ROOT")]
    shared_memory_root: Option<PathBuf>,

    /// Reject shared memory transfer; only embedded frames are accepted
    #[arg(long, env = "MEDIAGRAPH_DISABLE_SHARED_MEMORY")]
    disable_shared_memory: bool,

    /// Infer a short trailing batch when the client closes its stream
    #[arg(long, env = "MEDIAGRAPH_FLUSH_PARTIAL_BATCH")]
    flush_partial_batch: bool,

    /// Return upstream inferences alongside model results
    #[arg(long, env = "MEDIAGRAPH_ECHO_UPSTREAM_INFERENCES")]
    echo_upstream_inferences: bool,

    /// Mean intensity at or above which the reference classifier reports `bright`
    #[arg(long, default_value_t = 128, env = "MEDIAGRAPH_BRIGHTNESS_THRESHOLD")]
    brightness_threshold: u8,

    /// Emit logs as JSON lines
    #[arg(long, env = "MEDIAGRAPH_JSON_LOGS")]
    json_logs: bool,

    /// Serve Prometheus metrics at `/metrics` on this address
    #[arg(long, env = "MEDIAGRAPH_METRICS_BIND_ADDRESS")]
    metrics_bind_address: Option<String>,
}

impl Args {
    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = ServiceConfig::load(self.config.as_ref())?;

        if let Some(addr) = &self.bind_address {
            config.bind_address = addr.clone();
        }
        if let Some(size) = self.batch_size {
            config.session.batch_size = size;
        }
        if let Some(root) = &self.shared_memory_root {
            config.session.shared_memory_root = root.clone();
        }
        if self.disable_shared_memory {
            config.session.allow_shared_memory = false;
        }
        if self.flush_partial_batch {
            config.session.flush_partial_batch_on_close = true;
        }
        if self.echo_upstream_inferences {
            config.session.echo_upstream_inferences = true;
        }
        if self.json_logs {
            config.json_logging = true;
        }
        if let Some(addr) = &self.metrics_bind_address {
            config.metrics_bind_address = Some(addr.clone());
        }

        config.session.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.service_config()?;

    init_tracing(config.json_logging);

    // Set up Ctrl+C handler before the runtime starts
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown_flag);
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            warn!("Second interrupt, exiting immediately");
            std::process::exit(130);
        }
        info!("Interrupt received, shutting down");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("mediagraph-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, config, shutdown_flag))
}

async fn async_main(
    args: Args,
    config: ServiceConfig,
    shutdown_flag: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MediaGraph extension server starting"
    );
    info!(
        bind_address = %config.bind_address,
        batch_size = config.session.batch_size,
        allow_shared_memory = config.session.allow_shared_memory,
        shared_memory_root = %config.session.shared_memory_root.display(),
        flush_partial_batch = config.session.flush_partial_batch_on_close,
        metrics_bind_address = ?config.metrics_bind_address,
        supported_formats = ?config.session.formats.supported_pixel_formats,
        "Configuration loaded"
    );

    let server = GrpcServer::new(
        config,
        Arc::new(RawFrameDecoder),
        Arc::new(MeanIntensityClassifier::new(args.brightness_threshold)),
    )?;

    let metrics = server.metrics();
    server.serve_with_shutdown_flag(shutdown_flag).await?;

    info!(
        active_sessions = metrics.active_sessions.get(),
        frames_decoded = metrics.frames_decoded_total.get(),
        batches_inferred = metrics.batches_inferred_total.get(),
        "Server shut down gracefully"
    );
    Ok(())
}
