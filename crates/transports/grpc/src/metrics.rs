//! Prometheus metrics for the extension service
//!
//! Tracks active sessions, session outcomes, decoded frames, inferred
//! batches and batch inference latency. Frame and batch figures are taken
//! by wrapping the host's collaborators, so the session engine stays free
//! of transport concerns.

use async_trait::async_trait;
use mediagraph_core::{FrameDecoder, Image, Inference, InferenceEngine, VideoFrameFormat};
use prometheus::{CounterVec, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;
use std::time::Instant;

/// Prometheus metrics for the gRPC service
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Sessions currently running
    pub active_sessions: IntGauge,

    /// Finished sessions (labeled by outcome: client_closed, cancelled, error)
    pub sessions_total: CounterVec,

    /// Session failures (labeled by machine-readable reason)
    pub session_errors_total: CounterVec,

    /// Frames decoded successfully
    pub frames_decoded_total: IntCounter,

    /// Batches handed to the inference engine
    pub batches_inferred_total: IntCounter,

    /// Inference latency per batch in seconds
    pub batch_inference_seconds: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl ServiceMetrics {
    /// Create new metrics with a custom registry
    pub fn new(registry: Registry) -> Result<Self, prometheus::Error> {
        let active_sessions = IntGauge::new(
            "mediagraph_active_sessions",
            "Number of media stream sessions currently running",
        )?;

        let sessions_total = CounterVec::new(
            Opts::new("mediagraph_sessions_total", "Total media stream sessions finished"),
            &["outcome"],
        )?;

        let session_errors_total = CounterVec::new(
            Opts::new(
                "mediagraph_session_errors_total",
                "Total sessions terminated by an error",
            ),
            &["reason"],
        )?;

        let frames_decoded_total = IntCounter::new(
            "mediagraph_frames_decoded_total",
            "Total frames decoded",
        )?;

        let batches_inferred_total = IntCounter::new(
            "mediagraph_batches_inferred_total",
            "Total batches handed to the inference engine",
        )?;

        let batch_inference_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "mediagraph_batch_inference_seconds",
                "Inference latency per batch in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, // 1ms, 5ms, 10ms, 25ms
                0.05, 0.1, 0.25, 0.5, // 50ms .. 500ms
                1.0, 2.5, 5.0,
            ]),
        )?;

        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(sessions_total.clone()))?;
        registry.register(Box::new(session_errors_total.clone()))?;
        registry.register(Box::new(frames_decoded_total.clone()))?;
        registry.register(Box::new(batches_inferred_total.clone()))?;
        registry.register(Box::new(batch_inference_seconds.clone()))?;

        Ok(Self {
            active_sessions,
            sessions_total,
            session_errors_total,
            frames_decoded_total,
            batches_inferred_total,
            batch_inference_seconds,
            registry: Arc::new(registry),
        })
    }

    /// Create with a fresh registry
    pub fn with_default_registry() -> Result<Self, prometheus::Error> {
        Self::new(Registry::new())
    }

    pub fn record_session_start(&self) {
        self.active_sessions.inc();
    }

    /// Record a session that closed without error
    pub fn record_session_end(&self, outcome: &str) {
        self.active_sessions.dec();
        self.sessions_total.with_label_values(&[outcome]).inc();
    }

    /// Record a session terminated by an error
    pub fn record_session_error(&self, reason: &str) {
        self.active_sessions.dec();
        self.sessions_total.with_label_values(&["error"]).inc();
        self.session_errors_total.with_label_values(&[reason]).inc();
    }

    /// Metrics in the Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Counts successfully decoded frames
pub struct InstrumentedDecoder {
    inner: Arc<dyn FrameDecoder>,
    metrics: Arc<ServiceMetrics>,
}

impl InstrumentedDecoder {
    pub fn new(inner: Arc<dyn FrameDecoder>, metrics: Arc<ServiceMetrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl FrameDecoder for InstrumentedDecoder {
    async fn decode(
        &self,
        bytes: &[u8],
        format: &VideoFrameFormat,
    ) -> mediagraph_core::Result<Image> {
        let image = self.inner.decode(bytes, format).await?;
        self.metrics.frames_decoded_total.inc();
        Ok(image)
    }
}

/// Counts batches and observes inference latency
pub struct InstrumentedInference {
    inner: Arc<dyn InferenceEngine>,
    metrics: Arc<ServiceMetrics>,
}

impl InstrumentedInference {
    pub fn new(inner: Arc<dyn InferenceEngine>, metrics: Arc<ServiceMetrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl InferenceEngine for InstrumentedInference {
    async fn infer(&self, images: &[Image]) -> mediagraph_core::Result<Vec<Inference>> {
        let start = Instant::now();
        let result = self.inner.infer(images).await;
        self.metrics.batches_inferred_total.inc();
        self.metrics
            .batch_inference_seconds
            .observe(start.elapsed().as_secs_f64());
        result
    }
}
