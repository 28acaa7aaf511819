//! Session protocol messages
//!
//! Transport crates translate their wire types into these before handing
//! a stream to the [`SessionEngine`](crate::SessionEngine).

use crate::inference::Inference;
use crate::media::MediaDescriptor;
use bytes::Bytes;

/// Transfer mode requested in the preamble
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSelector {
    /// Pixel bytes inlined in each frame message
    Embedded,
    /// Pixel bytes referenced into a pre-shared memory segment
    SharedMemory { handle_name: String, length_bytes: u64 },
    /// A transfer method this endpoint does not implement
    Unrecognized(String),
}

/// Negotiated transfer mode, fixed for the session's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Embedded,
    SharedMemory,
}

/// First message of every stream
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorMessage {
    pub sequence_number: u64,
    pub transfer: TransferSelector,
    pub media: MediaDescriptor,
}

/// Where a frame's pixel payload lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameContent {
    Bytes(Bytes),
    Reference { address_offset: u64, length_bytes: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub sequence_number: u64,
    /// `None` when the client sent neither bytes nor a reference
    pub content: Option<FrameContent>,
    /// Upstream annotator inferences attached to this frame
    pub inferences: Vec<Inference>,
}

impl FrameMessage {
    pub fn embedded(sequence_number: u64, bytes: impl Into<Bytes>) -> Self {
        Self {
            sequence_number,
            content: Some(FrameContent::Bytes(bytes.into())),
            inferences: Vec::new(),
        }
    }

    pub fn reference(sequence_number: u64, address_offset: u64, length_bytes: u64) -> Self {
        Self {
            sequence_number,
            content: Some(FrameContent::Reference {
                address_offset,
                length_bytes,
            }),
            inferences: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Descriptor(DescriptorMessage),
    Frame(FrameMessage),
}

/// Reply to the preamble: echoes the timescale only
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedReply {
    pub media: MediaDescriptor,
}

/// Per-frame acknowledgment, optionally carrying batch results
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    /// Server-assigned, strictly increasing from 1
    pub sequence_number: u64,
    /// Client sequence number being acknowledged
    pub ack_sequence_number: u64,
    /// Empty on acknowledgment-only responses
    pub inferences: Vec<Inference>,
}

impl ResponseMessage {
    pub fn is_ack_only(&self) -> bool {
        self.inferences.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Negotiated(NegotiatedReply),
    Response(ResponseMessage),
}
