//! Integration tests for the session engine
//!
//! Drives complete sessions with in-memory inbound streams and an mpsc
//! response sink, using a pass-through decoder and a recording inference
//! engine.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use mediagraph_core::inference::Tag;
use mediagraph_core::{
    CloseReason, DescriptorMessage, Error, ErrorKind, FrameDecoder, FrameMessage, Image,
    InboundMessage, Inference, InferenceEngine, InferenceKind, InferenceValue, MediaDescriptor,
    OutboundMessage, PixelFormat, ResponseMessage, SessionConfig, SessionEngine, TransferSelector,
    VideoFrameFormat,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 64;

/// Copies frame bytes into an image after checking their length
struct CopyDecoder;

#[async_trait]
impl FrameDecoder for CopyDecoder {
    async fn decode(
        &self,
        bytes: &[u8],
        format: &VideoFrameFormat,
    ) -> mediagraph_core::Result<Image> {
        if bytes.len() as u64 != format.frame_size() {
            return Err(Error::Decode(format!(
                "expected {} bytes, got {}",
                format.frame_size(),
                bytes.len()
            )));
        }
        Ok(Image::new(*format, Bytes::copy_from_slice(bytes)))
    }
}

/// Returns one classification per image, tagged with the image's first byte
#[derive(Default)]
struct RecordingEngine {
    batches: Mutex<Vec<Vec<Image>>>,
}

impl RecordingEngine {
    fn batch_lens(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(|b| b.len()).collect()
    }
}

#[async_trait]
impl InferenceEngine for RecordingEngine {
    async fn infer(&self, images: &[Image]) -> mediagraph_core::Result<Vec<Inference>> {
        self.batches.lock().unwrap().push(images.to_vec());
        Ok(images
            .iter()
            .map(|img| Inference::classification(Tag::new(format!("frame-{}", img.pixels[0]), 0.9)))
            .collect())
    }
}

/// Returns an inference with no value on every call
struct EmptyResultEngine;

#[async_trait]
impl InferenceEngine for EmptyResultEngine {
    async fn infer(&self, _images: &[Image]) -> mediagraph_core::Result<Vec<Inference>> {
        Ok(vec![Inference {
            kind: InferenceKind::Entity,
            ..Default::default()
        }])
    }
}

/// Returns a value case this build does not know
struct UnknownVariantEngine;

#[async_trait]
impl InferenceEngine for UnknownVariantEngine {
    async fn infer(&self, images: &[Image]) -> mediagraph_core::Result<Vec<Inference>> {
        Ok(images
            .iter()
            .map(|_| Inference {
                value: Some(InferenceValue::Unknown { discriminant: 99 }),
                ..Default::default()
            })
            .collect())
    }
}

/// Fails every batch
struct FailingEngine;

#[async_trait]
impl InferenceEngine for FailingEngine {
    async fn infer(&self, _images: &[Image]) -> mediagraph_core::Result<Vec<Inference>> {
        Err(Error::Inference("model unavailable".into()))
    }
}

fn descriptor(pixel_format: PixelFormat) -> InboundMessage {
    InboundMessage::Descriptor(DescriptorMessage {
        sequence_number: 0,
        transfer: TransferSelector::Embedded,
        media: MediaDescriptor::video(90_000, VideoFrameFormat::new(WIDTH, HEIGHT, pixel_format)),
    })
}

fn frame(sequence: u64, fill: u8) -> InboundMessage {
    let size = PixelFormat::Bgr24.frame_size(WIDTH, HEIGHT) as usize;
    InboundMessage::Frame(FrameMessage::embedded(sequence, vec![fill; size]))
}

fn engine_with(config: SessionConfig, inference: Arc<dyn InferenceEngine>) -> SessionEngine {
    SessionEngine::new(config, Arc::new(CopyDecoder), inference).unwrap()
}

async fn run_session(
    engine: &SessionEngine,
    messages: Vec<InboundMessage>,
) -> (
    mediagraph_core::Result<mediagraph_core::SessionReport>,
    Vec<OutboundMessage>,
) {
    let (mut tx, mut rx) = mpsc::channel::<OutboundMessage>(128);
    let inbound = futures::stream::iter(messages.into_iter().map(Ok));
    let result = engine.run(inbound, &mut tx).await;
    drop(tx);

    let mut outbound = Vec::new();
    while let Some(message) = rx.recv().await {
        outbound.push(message);
    }
    (result, outbound)
}

fn responses(outbound: &[OutboundMessage]) -> Vec<&ResponseMessage> {
    outbound
        .iter()
        .filter_map(|m| match m {
            OutboundMessage::Response(r) => Some(r),
            OutboundMessage::Negotiated(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_batch_of_two_embedded_scenario() {
    let inference = Arc::new(RecordingEngine::default());
    let engine = engine_with(SessionConfig::default().with_batch_size(2), inference.clone());

    let (result, outbound) = run_session(
        &engine,
        vec![descriptor(PixelFormat::Bgr24), frame(1, 1), frame(2, 2)],
    )
    .await;

    let report = result.unwrap();
    assert_eq!(report.close_reason, CloseReason::ClientClosed);
    assert_eq!(outbound.len(), 3);

    match &outbound[0] {
        OutboundMessage::Negotiated(reply) => {
            assert_eq!(reply.media.timescale, 90_000);
            assert!(reply.media.video.is_none());
        }
        other => panic!("expected negotiated reply, got {:?}", other),
    }

    let responses = responses(&outbound);
    assert_eq!(responses[0].sequence_number, 1);
    assert_eq!(responses[0].ack_sequence_number, 1);
    assert!(responses[0].is_ack_only());

    assert_eq!(responses[1].sequence_number, 2);
    assert_eq!(responses[1].ack_sequence_number, 2);
    let tags: Vec<String> = responses[1]
        .inferences
        .iter()
        .map(|i| match &i.value {
            Some(InferenceValue::Classification(c)) => c.tag.as_ref().unwrap().value.clone(),
            other => panic!("unexpected inference value {:?}", other),
        })
        .collect();
    assert_eq!(tags, vec!["frame-1", "frame-2"]);
    assert_eq!(inference.batch_lens(), vec![2]);
}

#[tokio::test]
async fn test_ack_cycle_and_sequence_ignore_client_gaps() {
    let inference = Arc::new(RecordingEngine::default());
    let engine = engine_with(SessionConfig::default().with_batch_size(3), inference.clone());

    let client_seqs = [10u64, 20, 21, 50, 51, 90, 91];
    let mut messages = vec![descriptor(PixelFormat::Bgr24)];
    messages.extend(client_seqs.iter().map(|&s| frame(s, s as u8)));

    let (result, outbound) = run_session(&engine, messages).await;
    let report = result.unwrap();

    let responses = responses(&outbound);
    assert_eq!(responses.len(), client_seqs.len());
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response.sequence_number, i as u64 + 1);
        assert_eq!(response.ack_sequence_number, client_seqs[i]);
        let is_flush = (i + 1) % 3 == 0;
        assert_eq!(!response.is_ack_only(), is_flush, "response {}", i);
    }

    assert_eq!(inference.batch_lens(), vec![3, 3]);
    assert_eq!(report.batches_flushed, 2);
    assert_eq!(report.frames_received, 7);
    assert_eq!(report.frames_dropped, 1);
    assert_eq!(report.responses_emitted, 7);
}

#[tokio::test]
async fn test_batch_size_one_infers_every_frame() {
    let inference = Arc::new(RecordingEngine::default());
    let engine = engine_with(SessionConfig::default(), inference.clone());

    let (result, outbound) = run_session(
        &engine,
        vec![descriptor(PixelFormat::Bgr24), frame(1, 1), frame(2, 2), frame(3, 3)],
    )
    .await;

    assert!(result.is_ok());
    assert!(responses(&outbound).iter().all(|r| r.inferences.len() == 1));
    assert_eq!(inference.batch_lens(), vec![1, 1, 1]);
}

#[tokio::test]
async fn test_unsupported_format_fails_before_frames_are_read() {
    let engine = engine_with(SessionConfig::default(), Arc::new(RecordingEngine::default()));

    let reads = Arc::new(AtomicUsize::new(0));
    let counter = reads.clone();
    let messages = vec![descriptor(PixelFormat::Gray8), frame(1, 1), frame(2, 2)];
    let inbound = futures::stream::iter(messages.into_iter().map(Ok)).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (mut tx, mut rx) = mpsc::channel::<OutboundMessage>(8);
    let err = engine.run(inbound, &mut tx).await.unwrap_err();
    drop(tx);

    assert!(matches!(err, Error::UnsupportedFormat(_)));
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_empty_inference_terminates_session() {
    let engine = engine_with(
        SessionConfig::default().with_batch_size(2),
        Arc::new(EmptyResultEngine),
    );

    let (result, outbound) = run_session(
        &engine,
        vec![
            descriptor(PixelFormat::Bgr24),
            frame(1, 1),
            frame(2, 2),
            frame(3, 3),
            frame(4, 4),
        ],
    )
    .await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::MalformedInference { .. }));
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

    // Negotiated reply plus the ack for frame 1; nothing after the failure
    let responses = responses(&outbound);
    assert_eq!(outbound.len(), 2);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].ack_sequence_number, 1);
}

#[tokio::test]
async fn test_inference_collaborator_faults_are_internal_errors() {
    let engines: Vec<(Arc<dyn InferenceEngine>, &str)> = vec![
        (Arc::new(UnknownVariantEngine), "unrecognized_inference"),
        (Arc::new(FailingEngine), "inference_failed"),
    ];

    for (inference, reason) in engines {
        let engine = engine_with(SessionConfig::default().with_batch_size(2), inference);
        let (result, outbound) = run_session(
            &engine,
            vec![
                descriptor(PixelFormat::Bgr24),
                frame(1, 1),
                frame(2, 2),
                frame(3, 3),
            ],
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError, "{reason}");
        assert_eq!(err.reason(), reason);

        // Negotiated reply and the ack for frame 1 only
        let responses = responses(&outbound);
        assert_eq!(outbound.len(), 2, "{reason}");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].ack_sequence_number, 1);
        assert!(responses[0].is_ack_only());
    }
}

#[tokio::test]
async fn test_malformed_upstream_inference_is_rejected() {
    let engine = engine_with(SessionConfig::default(), Arc::new(RecordingEngine::default()));

    let mut bad = FrameMessage::embedded(1, vec![0u8; (WIDTH * HEIGHT * 3) as usize]);
    bad.inferences.push(Inference::default());

    let (result, outbound) = run_session(
        &engine,
        vec![descriptor(PixelFormat::Bgr24), InboundMessage::Frame(bad)],
    )
    .await;

    assert!(matches!(result, Err(Error::MalformedInference { .. })));
    assert_eq!(outbound.len(), 1);
}

#[tokio::test]
async fn test_upstream_inferences_echoed_when_enabled() {
    let config = SessionConfig {
        echo_upstream_inferences: true,
        ..SessionConfig::default().with_batch_size(2)
    };
    let engine = engine_with(config, Arc::new(RecordingEngine::default()));

    let mut annotated = FrameMessage::embedded(2, vec![2u8; (WIDTH * HEIGHT * 3) as usize]);
    annotated.inferences.push(Inference {
        kind: InferenceKind::Auto,
        value: Some(InferenceValue::Text(mediagraph_core::inference::Text {
            value: "plate ABC123".into(),
            ..Default::default()
        })),
        ..Default::default()
    });

    let (result, outbound) = run_session(
        &engine,
        vec![
            descriptor(PixelFormat::Bgr24),
            frame(1, 1),
            InboundMessage::Frame(annotated),
        ],
    )
    .await;
    assert!(result.is_ok());

    let flushed = responses(&outbound)[1];
    assert_eq!(flushed.inferences.len(), 3);
    assert_eq!(flushed.inferences[2].kind, InferenceKind::Text);
}

#[tokio::test]
async fn test_frame_before_descriptor_is_protocol_violation() {
    let engine = engine_with(SessionConfig::default(), Arc::new(RecordingEngine::default()));
    let (result, outbound) = run_session(&engine, vec![frame(7, 0)]).await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::FrameBeforeNegotiation { sequence: 7 }));
    assert_eq!(err.reason(), "frame_before_negotiation");
    assert!(outbound.is_empty());
}

#[tokio::test]
async fn test_second_descriptor_is_protocol_violation() {
    let engine = engine_with(SessionConfig::default(), Arc::new(RecordingEngine::default()));
    let (result, outbound) = run_session(
        &engine,
        vec![
            descriptor(PixelFormat::Bgr24),
            frame(1, 1),
            descriptor(PixelFormat::Bgr24),
        ],
    )
    .await;

    assert!(matches!(result, Err(Error::DuplicateDescriptor)));
    assert_eq!(outbound.len(), 2);
}

#[tokio::test]
async fn test_reference_without_region() {
    let engine = engine_with(SessionConfig::default(), Arc::new(RecordingEngine::default()));
    let (result, _) = run_session(
        &engine,
        vec![
            descriptor(PixelFormat::Bgr24),
            InboundMessage::Frame(FrameMessage::reference(1, 0, 12_288)),
        ],
    )
    .await;

    assert!(matches!(
        result,
        Err(Error::ReferenceWithoutRegion { sequence: 1 })
    ));
}

#[tokio::test]
async fn test_frame_without_content() {
    let engine = engine_with(SessionConfig::default(), Arc::new(RecordingEngine::default()));
    let (result, _) = run_session(
        &engine,
        vec![
            descriptor(PixelFormat::Bgr24),
            InboundMessage::Frame(FrameMessage {
                sequence_number: 3,
                content: None,
                inferences: Vec::new(),
            }),
        ],
    )
    .await;

    assert!(matches!(result, Err(Error::MissingFrameContent { sequence: 3 })));
}

#[tokio::test]
async fn test_trailing_partial_batch_flushed_when_configured() {
    let config = SessionConfig {
        flush_partial_batch_on_close: true,
        ..SessionConfig::default().with_batch_size(4)
    };
    let inference = Arc::new(RecordingEngine::default());
    let engine = engine_with(config, inference.clone());

    let (result, outbound) = run_session(
        &engine,
        vec![descriptor(PixelFormat::Bgr24), frame(1, 1), frame(2, 2)],
    )
    .await;

    let report = result.unwrap();
    assert_eq!(report.frames_dropped, 0);
    assert_eq!(report.batches_flushed, 1);

    let responses = responses(&outbound);
    assert_eq!(responses.len(), 3);
    let last = responses[2];
    assert_eq!(last.sequence_number, 3);
    assert_eq!(last.ack_sequence_number, 2);
    assert_eq!(last.inferences.len(), 2);
    assert_eq!(inference.batch_lens(), vec![2]);
}

#[tokio::test]
async fn test_cancelled_host_stops_session() {
    let inference = Arc::new(RecordingEngine::default());
    let engine = engine_with(SessionConfig::default(), inference.clone());

    let (mut tx, rx) = mpsc::channel::<OutboundMessage>(8);
    drop(rx);

    let messages = vec![descriptor(PixelFormat::Bgr24), frame(1, 1)];
    let report = engine
        .run(futures::stream::iter(messages.into_iter().map(Ok)), &mut tx)
        .await
        .unwrap();

    assert_eq!(report.close_reason, CloseReason::Cancelled);
    assert_eq!(report.frames_received, 0);
    assert!(inference.batch_lens().is_empty());
}

#[tokio::test]
async fn test_empty_stream_closes_cleanly() {
    let engine = engine_with(SessionConfig::default(), Arc::new(RecordingEngine::default()));
    let (result, outbound) = run_session(&engine, Vec::new()).await;

    let report = result.unwrap();
    assert_eq!(report.close_reason, CloseReason::ClientClosed);
    assert!(report.transfer_mode.is_none());
    assert!(outbound.is_empty());
}

#[tokio::test]
async fn test_cancelled_inbound_stream_closes_cleanly() {
    let inference = Arc::new(RecordingEngine::default());
    let engine = engine_with(SessionConfig::default().with_batch_size(2), inference.clone());
    let inbound = futures::stream::iter(vec![
        Ok(descriptor(PixelFormat::Bgr24)),
        Ok(frame(1, 1)),
        Err(Error::Cancelled("stream reset".into())),
        Ok(frame(2, 2)),
    ]);

    let (mut tx, mut rx) = mpsc::channel::<OutboundMessage>(8);
    let report = engine.run(inbound, &mut tx).await.unwrap();
    drop(tx);

    assert_eq!(report.close_reason, CloseReason::Cancelled);
    assert_eq!(report.frames_received, 1);
    assert_eq!(report.frames_dropped, 1);
    assert!(inference.batch_lens().is_empty());

    let mut outbound = Vec::new();
    while let Some(message) = rx.recv().await {
        outbound.push(message);
    }
    assert_eq!(outbound.len(), 2);
}

#[tokio::test]
async fn test_inbound_stream_error_terminates_session() {
    let engine = engine_with(SessionConfig::default(), Arc::new(RecordingEngine::default()));
    let inbound = futures::stream::iter(vec![
        Ok(descriptor(PixelFormat::Bgr24)),
        Err(Error::Transport("connection reset".into())),
        Ok(frame(1, 1)),
    ]);

    let (mut tx, _rx) = mpsc::channel::<OutboundMessage>(8);
    let err = engine.run(inbound, &mut tx).await.unwrap_err();
    assert_eq!(err.reason(), "transport_error");
}

#[test]
fn test_engine_rejects_invalid_config() {
    let result = SessionEngine::new(
        SessionConfig::default().with_batch_size(0),
        Arc::new(CopyDecoder),
        Arc::new(RecordingEngine::default()),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}
