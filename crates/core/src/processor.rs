//! Collaborator capabilities supplied by the host
//!
//! The session engine never decodes pixels or runs a model itself. Hosts
//! plug those in through [`FrameDecoder`] and [`InferenceEngine`], and
//! receive responses through a [`ResponseSink`].

use crate::inference::Inference;
use crate::media::VideoFrameFormat;
use crate::message::OutboundMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Structured image produced by a [`FrameDecoder`]
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub format: VideoFrameFormat,
    pub pixels: Bytes,
}

impl Image {
    pub fn new(format: VideoFrameFormat, pixels: Bytes) -> Self {
        Self { format, pixels }
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }
}

/// Turns raw frame bytes into an [`Image`]
///
/// `bytes` may borrow straight from a shared memory mapping and is only
/// valid for the duration of the call.
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    async fn decode(&self, bytes: &[u8], format: &VideoFrameFormat) -> Result<Image>;
}

/// Batch inference model
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn infer(&self, images: &[Image]) -> Result<Vec<Inference>>;
}

/// Outbound half of a session stream
#[async_trait]
pub trait ResponseSink: Send {
    /// Deliver one message; [`SinkError::Closed`] means the host went away
    async fn send(&mut self, message: OutboundMessage) -> std::result::Result<(), SinkError>;
}

#[derive(Debug)]
pub enum SinkError {
    /// Receiver dropped: treat as cancellation
    Closed,
    /// Any other delivery failure
    Failed(Error),
}

#[async_trait]
impl ResponseSink for mpsc::Sender<OutboundMessage> {
    async fn send(&mut self, message: OutboundMessage) -> std::result::Result<(), SinkError> {
        mpsc::Sender::send(self, message)
            .await
            .map_err(|_| SinkError::Closed)
    }
}
