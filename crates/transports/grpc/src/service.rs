//! `MediaGraphExtension` service implementation
//!
//! Each `ProcessMediaStream` call gets its own tokio task running one
//! session. Responses flow back through a bounded channel; a session that
//! fails sends one terminal `Err(Status)` and nothing after it.

use crate::adapters::{error_to_status, inbound_from_proto, outbound_to_proto, status_to_error};
use crate::generated::MediaStreamMessage;
use crate::metrics::{InstrumentedDecoder, InstrumentedInference, ServiceMetrics};
use crate::{MediaGraphExtension, ServiceError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use mediagraph_core::{
    CloseReason, FrameDecoder, InferenceEngine, OutboundMessage, ResponseSink, SessionConfig,
    SessionEngine, SinkError,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

/// Responses buffered per stream before the session waits on the client
const RESPONSE_CHANNEL_CAPACITY: usize = 32;

type ResponseSender = mpsc::Sender<Result<MediaStreamMessage, Status>>;

/// gRPC front end for the session engine
#[derive(Clone)]
pub struct MediaGraphExtensionService {
    engine: SessionEngine,
    metrics: Arc<ServiceMetrics>,
}

impl MediaGraphExtensionService {
    /// Build the service around host collaborators
    ///
    /// The decoder and inference engine are wrapped so their activity is
    /// reflected in `metrics`.
    pub fn new(
        config: SessionConfig,
        decoder: Arc<dyn FrameDecoder>,
        inference: Arc<dyn InferenceEngine>,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self, ServiceError> {
        let decoder = Arc::new(InstrumentedDecoder::new(decoder, Arc::clone(&metrics)));
        let inference = Arc::new(InstrumentedInference::new(inference, Arc::clone(&metrics)));
        let engine = SessionEngine::new(config, decoder, inference)?;
        Ok(Self { engine, metrics })
    }

    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn session_config(&self) -> &SessionConfig {
        self.engine.config()
    }
}

#[tonic::async_trait]
impl MediaGraphExtension for MediaGraphExtensionService {
    type ProcessMediaStreamStream = ReceiverStream<Result<MediaStreamMessage, Status>>;

    async fn process_media_stream(
        &self,
        request: Request<Streaming<MediaStreamMessage>>,
    ) -> Result<Response<Self::ProcessMediaStreamStream>, Status> {
        info!(peer = ?request.remote_addr(), "ProcessMediaStream RPC invoked");
        Ok(Response::new(self.spawn_session(request.into_inner())))
    }
}

impl MediaGraphExtensionService {
    /// Run one session on its own task and stream its responses
    ///
    /// A cancelled inbound stream ends the session cleanly; any other
    /// failure is sent as one terminal `Err(Status)`.
    fn spawn_session<S>(&self, inbound: S) -> ReceiverStream<Result<MediaStreamMessage, Status>>
    where
        S: Stream<Item = Result<MediaStreamMessage, Status>> + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let inbound =
            inbound.map(|message| message.map_err(status_to_error).and_then(inbound_from_proto));
        let engine = self.engine.clone();
        let metrics = Arc::clone(&self.metrics);

        // Spawn async task to drive the session
        tokio::spawn(async move {
            metrics.record_session_start();
            let mut sink = GrpcResponseSink::new(tx.clone());

            match engine.run(inbound, &mut sink).await {
                Ok(report) => {
                    let outcome = match report.close_reason {
                        CloseReason::ClientClosed => "client_closed",
                        CloseReason::Cancelled => "cancelled",
                    };
                    metrics.record_session_end(outcome);
                }
                Err(e) => {
                    metrics.record_session_error(e.reason());
                    if tx.send(Err(error_to_status(&e))).await.is_err() {
                        debug!("Client gone before terminal status could be sent");
                    }
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

/// Session sink writing wire messages into the response channel
pub struct GrpcResponseSink {
    tx: ResponseSender,
}

impl GrpcResponseSink {
    pub fn new(tx: ResponseSender) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ResponseSink for GrpcResponseSink {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), SinkError> {
        let wire = outbound_to_proto(message).map_err(SinkError::Failed)?;
        self.tx.send(Ok(wire)).await.map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::{
        media_descriptor::MediaSampleFormat, media_sample::Content,
        media_stream_message::Payload, Dimensions, MediaDescriptor, MediaSample,
        MediaStreamDescriptor, PixelFormat, VideoFrameSampleFormat,
    };
    use bytes::Bytes;
    use mediagraph_core::inference::Tag;
    use mediagraph_core::{Image, Inference, InferenceValue, ResponseMessage, VideoFrameFormat};

    struct CopyDecoder;

    #[async_trait]
    impl FrameDecoder for CopyDecoder {
        async fn decode(
            &self,
            bytes: &[u8],
            format: &VideoFrameFormat,
        ) -> mediagraph_core::Result<Image> {
            Ok(Image::new(*format, Bytes::copy_from_slice(bytes)))
        }
    }

    struct ConstantEngine;

    #[async_trait]
    impl InferenceEngine for ConstantEngine {
        async fn infer(&self, images: &[Image]) -> mediagraph_core::Result<Vec<Inference>> {
            Ok(images
                .iter()
                .map(|_| Inference::classification(Tag::new("object", 0.5)))
                .collect())
        }
    }

    fn test_service(batch_size: usize) -> MediaGraphExtensionService {
        MediaGraphExtensionService::new(
            SessionConfig::default().with_batch_size(batch_size),
            Arc::new(CopyDecoder),
            Arc::new(ConstantEngine),
            Arc::new(ServiceMetrics::with_default_registry().unwrap()),
        )
        .unwrap()
    }

    fn descriptor() -> MediaStreamMessage {
        MediaStreamMessage {
            sequence_number: 1,
            ack_sequence_number: 0,
            payload: Some(Payload::MediaStreamDescriptor(MediaStreamDescriptor {
                media_descriptor: Some(MediaDescriptor {
                    timescale: 90_000,
                    media_sample_format: Some(MediaSampleFormat::VideoFrameSampleFormat(
                        VideoFrameSampleFormat {
                            pixel_format: PixelFormat::Bgr24 as i32,
                            dimensions: Some(Dimensions {
                                width: 2,
                                height: 2,
                            }),
                        },
                    )),
                }),
                data_transfer_properties: None,
            })),
        }
    }

    fn frame(sequence_number: u64) -> MediaStreamMessage {
        MediaStreamMessage {
            sequence_number,
            ack_sequence_number: 0,
            payload: Some(Payload::MediaSample(MediaSample {
                content: Some(Content::ContentBytes(vec![0u8; 12])),
                inferences: vec![],
            })),
        }
    }

    #[tokio::test]
    async fn test_cancelled_inbound_closes_session_cleanly() {
        let service = test_service(2);
        let metrics = service.metrics();
        let inbound = futures::stream::iter(vec![
            Ok(descriptor()),
            Ok(frame(2)),
            Err(Status::cancelled("stream reset by peer")),
        ]);

        let responses: Vec<_> = service.spawn_session(inbound).collect().await;

        // Negotiated reply and the ack for frame 2, no terminal status
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.is_ok()));
        assert_eq!(
            metrics.sessions_total.with_label_values(&["cancelled"]).get(),
            1.0
        );
        assert_eq!(metrics.sessions_total.with_label_values(&["error"]).get(), 0.0);
        assert_eq!(
            metrics
                .session_errors_total
                .with_label_values(&["transport_error"])
                .get(),
            0.0
        );
        assert_eq!(metrics.active_sessions.get(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_ends_with_internal_status() {
        let service = test_service(1);
        let metrics = service.metrics();
        let inbound = futures::stream::iter(vec![
            Ok(descriptor()),
            Err(Status::unavailable("connection reset")),
        ]);

        let responses: Vec<_> = service.spawn_session(inbound).collect().await;

        assert_eq!(responses.len(), 2);
        let status = responses[1].as_ref().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(
            metrics
                .session_errors_total
                .with_label_values(&["transport_error"])
                .get(),
            1.0
        );
        assert_eq!(metrics.active_sessions.get(), 0);
    }

    #[tokio::test]
    async fn test_sink_forwards_wire_messages() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = GrpcResponseSink::new(tx);

        sink.send(OutboundMessage::Response(ResponseMessage {
            sequence_number: 1,
            ack_sequence_number: 9,
            inferences: vec![],
        }))
        .await
        .unwrap();

        let message = rx.recv().await.unwrap().unwrap();
        assert_eq!(message.sequence_number, 1);
        assert_eq!(message.ack_sequence_number, 9);
        assert!(matches!(message.payload, Some(Payload::MediaSample(_))));
    }

    #[tokio::test]
    async fn test_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = GrpcResponseSink::new(tx);

        let result = sink
            .send(OutboundMessage::Response(ResponseMessage {
                sequence_number: 1,
                ack_sequence_number: 1,
                inferences: vec![],
            }))
            .await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn test_sink_rejects_unencodable_inference() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = GrpcResponseSink::new(tx);

        let result = sink
            .send(OutboundMessage::Response(ResponseMessage {
                sequence_number: 1,
                ack_sequence_number: 1,
                inferences: vec![Inference {
                    value: Some(InferenceValue::Unknown { discriminant: 7 }),
                    ..Default::default()
                }],
            }))
            .await;
        assert!(matches!(result, Err(SinkError::Failed(_))));
        assert!(rx.try_recv().is_err());
    }
}
