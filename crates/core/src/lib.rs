//! MediaGraph session protocol engine
//!
//! Transport-agnostic core of a media graph extension endpoint: a host
//! streams video frames in, the engine negotiates the transfer mode,
//! resolves each frame (inline or from shared memory), batches decoded
//! frames and returns acknowledgments plus batched inference results.
//!
//! # Modules
//!
//! - [`negotiator`]: preamble handling and format validation
//! - [`buffer`]: read-only shared memory regions and zero-copy views
//! - [`batch`]: fixed-size batch assembly
//! - [`sequence`]: response numbering and acknowledgment echo
//! - [`inference`]: inference payloads and type-tag normalization
//! - [`session`]: the per-stream state machine tying it together
//!
//! Pixel decoding and the inference model are supplied by the host through
//! the traits in [`processor`].

pub mod batch;
pub mod buffer;
pub mod config;
pub mod error;
pub mod inference;
pub mod media;
pub mod message;
pub mod negotiator;
pub mod processor;
pub mod sequence;
pub mod session;

pub use config::SessionConfig;
pub use error::{Error, ErrorKind, Result, StatusClass};
pub use inference::{Inference, InferenceKind, InferenceValue};
pub use media::{MediaDescriptor, PixelFormat, VideoFrameFormat};
pub use message::{
    DescriptorMessage, FrameContent, FrameMessage, InboundMessage, NegotiatedReply,
    OutboundMessage, ResponseMessage, TransferMode, TransferSelector,
};
pub use processor::{FrameDecoder, Image, InferenceEngine, ResponseSink, SinkError};
pub use session::{CloseReason, MediaStreamSession, SessionEngine, SessionReport, SessionState};
