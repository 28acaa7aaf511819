//! Error types for the MediaGraph session engine

use thiserror::Error;

/// Result type alias for session engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error taxonomy used for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The peer broke the session contract (ordering, bounds, malformed payloads)
    ProtocolViolation,
    /// The negotiated media format is outside the supported set
    UnsupportedFormat,
    /// The shared memory region could not be acquired
    ResourceError,
    /// Collaborator or implementation fault, not user-correctable
    InternalError,
    /// The host abandoned the stream; not a failure of the session
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::ResourceError => "resource_error",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Status class a transport reports for a terminated session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    InvalidArgument,
    OutOfRange,
    Internal,
    Cancelled,
}

/// Errors that terminate a media stream session
///
/// Every variant is fatal: the engine releases the shared memory region
/// and stops reading before the error reaches the host.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame message arrived before the descriptor preamble
    #[error("Frame message (sequence {sequence}) received before session negotiation")]
    FrameBeforeNegotiation { sequence: u64 },

    /// A second descriptor arrived on an already negotiated session
    #[error("Media stream descriptor already received for this session")]
    DuplicateDescriptor,

    /// Frame message carried neither inline bytes nor a buffer reference
    #[error("Frame {sequence} has no content")]
    MissingFrameContent { sequence: u64 },

    /// Frame referenced shared memory on a session that negotiated embedded transfer
    #[error("Frame {sequence} references shared memory but no region was negotiated")]
    ReferenceWithoutRegion { sequence: u64 },

    /// Reference falls outside the mapped region
    #[error("Reference [{offset}, {offset}+{length}) exceeds region '{handle}' of {region_len}")]
    OutOfBounds {
        handle: String,
        offset: u64,
        length: u64,
        region_len: usize,
    },

    /// Inference carries no populated value
    #[error("Inference has no value set. Inference type: {declared} Inference subtype: {subtype}")]
    MalformedInference { declared: String, subtype: String },

    /// Wire message could not be mapped onto the session protocol
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Frame bytes could not be decoded against the negotiated format
    #[error("Frame decode failed: {0}")]
    Decode(String),

    /// Transfer mode selector not implemented by this endpoint
    #[error("Unsupported data transfer method: {0}")]
    UnsupportedTransferMode(String),

    /// Shared memory was requested but is disabled by configuration
    #[error("Shared memory transfer is disabled on this server")]
    TransferModeDisabled,

    /// Declared media format rejected by the format policy
    #[error("Unsupported media format: {0}")]
    UnsupportedFormat(String),

    /// Shared memory segment missing or not accessible
    #[error("Error opening shared memory region '{handle}': {source}")]
    RegionUnavailable {
        handle: String,
        #[source]
        source: std::io::Error,
    },

    /// Shared memory segment smaller than the declared length
    #[error("Shared memory region '{handle}' is {actual} bytes, {declared} declared")]
    RegionTooSmall {
        handle: String,
        declared: u64,
        actual: u64,
    },

    /// Handle name cannot name a segment (empty, path components)
    #[error("Invalid shared memory handle name '{0}'")]
    InvalidHandleName(String),

    /// Inference payload discriminant this build cannot interpret
    #[error("Inference has unrecognized value case {0}")]
    UnrecognizedInference(u32),

    /// Inference collaborator failed
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Host cancelled the inbound stream
    ///
    /// [`SessionEngine::run`](crate::SessionEngine::run) turns this into a
    /// clean close with [`CloseReason::Cancelled`](crate::CloseReason::Cancelled).
    #[error("Stream cancelled by host: {0}")]
    Cancelled(String),

    /// Response transport failed for a reason other than cancellation
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FrameBeforeNegotiation { .. }
            | Error::DuplicateDescriptor
            | Error::MissingFrameContent { .. }
            | Error::ReferenceWithoutRegion { .. }
            | Error::OutOfBounds { .. }
            | Error::MalformedInference { .. }
            | Error::MalformedMessage(_)
            | Error::Decode(_)
            | Error::UnsupportedTransferMode(_)
            | Error::TransferModeDisabled => ErrorKind::ProtocolViolation,
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::RegionUnavailable { .. }
            | Error::RegionTooSmall { .. }
            | Error::InvalidHandleName(_) => ErrorKind::ResourceError,
            Error::UnrecognizedInference(_)
            | Error::Inference(_)
            | Error::Transport(_)
            | Error::Config(_) => ErrorKind::InternalError,
            Error::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Machine-readable reason string surfaced to the host
    pub fn reason(&self) -> &'static str {
        match self {
            Error::FrameBeforeNegotiation { .. } => "frame_before_negotiation",
            Error::DuplicateDescriptor => "duplicate_descriptor",
            Error::MissingFrameContent { .. } => "missing_frame_content",
            Error::ReferenceWithoutRegion { .. } => "reference_without_region",
            Error::OutOfBounds { .. } => "reference_out_of_bounds",
            Error::MalformedInference { .. } => "malformed_inference",
            Error::MalformedMessage(_) => "malformed_message",
            Error::Decode(_) => "frame_decode_failed",
            Error::UnsupportedTransferMode(_) => "unsupported_transfer_mode",
            Error::TransferModeDisabled => "transfer_mode_disabled",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::RegionUnavailable { .. } => "region_unavailable",
            Error::RegionTooSmall { .. } => "region_too_small",
            Error::InvalidHandleName(_) => "invalid_handle_name",
            Error::UnrecognizedInference(_) => "unrecognized_inference",
            Error::Inference(_) => "inference_failed",
            Error::Cancelled(_) => "cancelled",
            Error::Transport(_) => "transport_error",
            Error::Config(_) => "invalid_config",
        }
    }

    pub fn status_class(&self) -> StatusClass {
        match self {
            Error::UnsupportedTransferMode(_)
            | Error::TransferModeDisabled
            | Error::UnsupportedFormat(_) => StatusClass::OutOfRange,
            _ => match self.kind() {
                ErrorKind::InternalError => StatusClass::Internal,
                ErrorKind::Cancelled => StatusClass::Cancelled,
                _ => StatusClass::InvalidArgument,
            },
        }
    }
}
