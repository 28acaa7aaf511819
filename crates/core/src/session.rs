//! Media stream session engine
//!
//! Drives one bidirectional stream from preamble to close.
//!
//! # Flow
//!
//! 1. `AwaitingPreamble`: the first message must be a descriptor; the
//!    negotiator fixes transfer mode and media format and the engine emits
//!    the negotiated reply
//! 2. `Streaming`: each frame is resolved (inline bytes, or a zero-copy view
//!    into the shared region), decoded and admitted to the batch; a pending
//!    batch yields an acknowledgment-only response, a full batch is inferred,
//!    normalized and returned with the acknowledgment
//! 3. `Closed`: client half-close, host cancellation or any fatal error. The
//!    shared region is released on every path
//!
//! Message handling is strictly sequential: every response is delivered
//! before the next inbound message is read.

use crate::batch::{Admission, Batch, BatchAssembler, BatchFrame};
use crate::buffer::{BufferResolver, SharedRegion};
use crate::config::SessionConfig;
use crate::inference::{normalize_all, Inference};
use crate::media::{MediaDescriptor, VideoFrameFormat};
use crate::message::{
    FrameContent, FrameMessage, InboundMessage, OutboundMessage, ResponseMessage, TransferMode,
};
use crate::negotiator::SessionNegotiator;
use crate::processor::{FrameDecoder, InferenceEngine, ResponseSink, SinkError};
use crate::sequence::SequenceTracker;
use crate::{Error, Result};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingPreamble,
    Negotiated,
    Streaming,
    Closed,
}

/// Why a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client half-closed its stream
    ClientClosed,
    /// Host dropped the response stream
    Cancelled,
}

/// Summary returned when a session closes cleanly
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub close_reason: CloseReason,
    pub transfer_mode: Option<TransferMode>,
    pub frames_received: u64,
    pub responses_emitted: u64,
    pub batches_flushed: u64,
    /// Frames left in a trailing partial batch that was not inferred
    pub frames_dropped: u64,
}

/// Per-stream state, owned by the engine for the stream's lifetime
#[derive(Debug)]
pub struct MediaStreamSession {
    id: Uuid,
    state: SessionState,
    transfer_mode: Option<TransferMode>,
    descriptor: Option<MediaDescriptor>,
    format: Option<VideoFrameFormat>,
    region: Option<SharedRegion>,
    sequences: SequenceTracker,
    batch: BatchAssembler,
    frames_received: u64,
    batches_flushed: u64,
    frames_dropped: u64,
}

impl MediaStreamSession {
    pub fn new(batch_size: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::AwaitingPreamble,
            transfer_mode: None,
            descriptor: None,
            format: None,
            region: None,
            sequences: SequenceTracker::new(),
            batch: BatchAssembler::new(batch_size),
            frames_received: 0,
            batches_flushed: 0,
            frames_dropped: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transfer_mode(&self) -> Option<TransferMode> {
        self.transfer_mode
    }

    pub fn descriptor(&self) -> Option<&MediaDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn region(&self) -> Option<&SharedRegion> {
        self.region.as_ref()
    }

    pub fn response_sequence(&self) -> u64 {
        self.sequences.response_sequence()
    }

    /// Release the shared region, if any, and mark the session closed
    ///
    /// Returns `true` when this call released a region.
    pub fn close(&mut self) -> bool {
        self.state = SessionState::Closed;
        self.region.take().is_some_and(|mut region| region.close())
    }

    fn report(&self, close_reason: CloseReason) -> SessionReport {
        SessionReport {
            session_id: self.id,
            close_reason,
            transfer_mode: self.transfer_mode,
            frames_received: self.frames_received,
            responses_emitted: self.sequences.response_sequence(),
            batches_flushed: self.batches_flushed,
            frames_dropped: self.frames_dropped,
        }
    }
}

/// Runs media stream sessions against host-supplied collaborators
///
/// One engine is shared by all sessions of a server; it holds no per-session
/// state, so concurrent sessions never touch each other.
#[derive(Clone)]
pub struct SessionEngine {
    config: Arc<SessionConfig>,
    resolver: BufferResolver,
    decoder: Arc<dyn FrameDecoder>,
    inference: Arc<dyn InferenceEngine>,
}

impl SessionEngine {
    pub fn new(
        config: SessionConfig,
        decoder: Arc<dyn FrameDecoder>,
        inference: Arc<dyn InferenceEngine>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            resolver: BufferResolver::new(config.shared_memory_root.clone()),
            config: Arc::new(config),
            decoder,
            inference,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one session to completion
    ///
    /// Returns a report on client close or cancellation; any fatal protocol,
    /// resource or collaborator error is returned after the region has been
    /// released. No response is emitted after a failure.
    pub async fn run<S, K>(&self, inbound: S, sink: &mut K) -> Result<SessionReport>
    where
        S: Stream<Item = Result<InboundMessage>> + Send + Unpin,
        K: ResponseSink + ?Sized,
    {
        let mut session = MediaStreamSession::new(self.config.batch_size);
        let span = info_span!("media_session", session_id = %session.id());

        async move {
            let started = Instant::now();
            info!(batch_size = self.config.batch_size, "Session started");

            let result = match self.drive(&mut session, inbound, sink).await {
                Err(Error::Cancelled(detail)) => {
                    info!(%detail, "Inbound stream cancelled by host, stopping session");
                    if let Some(batch) = session.batch.drain() {
                        session.frames_dropped += batch.len() as u64;
                    }
                    Ok(CloseReason::Cancelled)
                }
                other => other,
            };
            session.close();

            match result {
                Ok(reason) => {
                    let report = session.report(reason);
                    info!(
                        reason = ?reason,
                        frames = report.frames_received,
                        responses = report.responses_emitted,
                        batches = report.batches_flushed,
                        dropped = report.frames_dropped,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Session closed"
                    );
                    Ok(report)
                }
                Err(e) => {
                    error!(
                        kind = e.kind().as_str(),
                        reason = e.reason(),
                        error = %e,
                        "Session terminated"
                    );
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive<S, K>(
        &self,
        session: &mut MediaStreamSession,
        mut inbound: S,
        sink: &mut K,
    ) -> Result<CloseReason>
    where
        S: Stream<Item = Result<InboundMessage>> + Send + Unpin,
        K: ResponseSink + ?Sized,
    {
        // First message from the client must be the descriptor
        let descriptor = match inbound.next().await.transpose()? {
            None => {
                info!("Stream ended before preamble");
                return Ok(CloseReason::ClientClosed);
            }
            Some(InboundMessage::Frame(frame)) => {
                return Err(Error::FrameBeforeNegotiation {
                    sequence: frame.sequence_number,
                });
            }
            Some(InboundMessage::Descriptor(descriptor)) => descriptor,
        };
        debug!(
            sequence = descriptor.sequence_number,
            "Received media stream descriptor"
        );

        let negotiated =
            SessionNegotiator::new(&self.config, &self.resolver).negotiate(descriptor)?;
        session.transfer_mode = Some(negotiated.transfer_mode);
        session.descriptor = Some(negotiated.descriptor);
        session.format = Some(negotiated.format);
        session.region = negotiated.region;
        session.state = SessionState::Negotiated;

        if !deliver(sink, OutboundMessage::Negotiated(negotiated.reply)).await? {
            return Ok(CloseReason::Cancelled);
        }

        while let Some(message) = inbound.next().await.transpose()? {
            let frame = match message {
                InboundMessage::Frame(frame) => frame,
                InboundMessage::Descriptor(_) => return Err(Error::DuplicateDescriptor),
            };
            session.state = SessionState::Streaming;

            let response = self.handle_frame(session, frame).await?;
            if !deliver(sink, OutboundMessage::Response(response)).await? {
                return Ok(CloseReason::Cancelled);
            }
        }

        // Client half-closed
        if let Some(batch) = session.batch.drain() {
            if self.config.flush_partial_batch_on_close {
                info!(batch_len = batch.len(), "Flushing trailing partial batch");
                let ack = batch.last_sequence().unwrap_or_default();
                let inferences = self.flush(session, batch).await?;
                let response = ResponseMessage {
                    sequence_number: session.sequences.next_response_seq(),
                    ack_sequence_number: ack,
                    inferences,
                };
                if !deliver(sink, OutboundMessage::Response(response)).await? {
                    return Ok(CloseReason::Cancelled);
                }
            } else {
                warn!(
                    batch_len = batch.len(),
                    "Dropping trailing partial batch on stream close"
                );
                session.frames_dropped += batch.len() as u64;
            }
        }

        Ok(CloseReason::ClientClosed)
    }

    async fn handle_frame(
        &self,
        session: &mut MediaStreamSession,
        frame: FrameMessage,
    ) -> Result<ResponseMessage> {
        let sequence = frame.sequence_number;
        debug!(sequence, "Received media sample");
        session.frames_received += 1;

        let format = session
            .format
            .ok_or(Error::FrameBeforeNegotiation { sequence })?;
        let upstream = normalize_all(frame.inferences)?;

        let image = match frame.content {
            None => return Err(Error::MissingFrameContent { sequence }),
            Some(FrameContent::Bytes(bytes)) => self.decoder.decode(&bytes, &format).await?,
            Some(FrameContent::Reference {
                address_offset,
                length_bytes,
            }) => {
                let region = session
                    .region
                    .as_ref()
                    .ok_or(Error::ReferenceWithoutRegion { sequence })?;
                let view = region.resolve(address_offset, length_bytes)?;
                self.decoder.decode(view, &format).await?
            }
        };

        let ack_sequence_number = session.sequences.ack(sequence);
        let inferences = match session.batch.admit(BatchFrame {
            sequence_number: sequence,
            image,
            upstream,
        }) {
            Admission::Pending => Vec::new(),
            Admission::ReadyToFlush(batch) => self.flush(session, batch).await?,
        };

        Ok(ResponseMessage {
            sequence_number: session.sequences.next_response_seq(),
            ack_sequence_number,
            inferences,
        })
    }

    /// Run inference on a batch and normalize the results
    async fn flush(
        &self,
        session: &mut MediaStreamSession,
        batch: Batch,
    ) -> Result<Vec<Inference>> {
        let started = Instant::now();
        let images = batch.images();
        let results = self.inference.infer(&images).await?;
        let mut inferences = normalize_all(results)?;

        if self.config.echo_upstream_inferences {
            inferences.extend(batch.upstream_inferences());
        }

        session.batches_flushed += 1;
        debug!(
            batch_len = batch.len(),
            inferences = inferences.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch inferred"
        );
        Ok(inferences)
    }
}

/// Send one message; `Ok(false)` means the host cancelled the stream
async fn deliver<K: ResponseSink + ?Sized>(
    sink: &mut K,
    message: OutboundMessage,
) -> Result<bool> {
    match sink.send(message).await {
        Ok(()) => Ok(true),
        Err(SinkError::Closed) => {
            info!("Response stream closed by host, stopping session");
            Ok(false)
        }
        Err(SinkError::Failed(e)) => Err(e),
    }
}
