//! Session preamble negotiation
//!
//! Consumes the descriptor message, sets up the transfer mode (opening the
//! shared memory region when requested), validates the media format and
//! builds the reply that tells the client the server's acknowledgment
//! clock.

use crate::buffer::{BufferResolver, SharedRegion};
use crate::config::SessionConfig;
use crate::media::{MediaDescriptor, VideoFrameFormat};
use crate::message::{DescriptorMessage, NegotiatedReply, TransferMode, TransferSelector};
use crate::{Error, Result};
use tracing::{info, warn};

/// Outcome of a successful negotiation
#[derive(Debug)]
pub struct Negotiated {
    pub transfer_mode: TransferMode,
    pub descriptor: MediaDescriptor,
    pub format: VideoFrameFormat,
    /// Present iff `transfer_mode` is `SharedMemory`
    pub region: Option<SharedRegion>,
    pub reply: NegotiatedReply,
}

pub struct SessionNegotiator<'a> {
    config: &'a SessionConfig,
    resolver: &'a BufferResolver,
}

impl<'a> SessionNegotiator<'a> {
    pub fn new(config: &'a SessionConfig, resolver: &'a BufferResolver) -> Self {
        Self { config, resolver }
    }

    pub fn negotiate(&self, message: DescriptorMessage) -> Result<Negotiated> {
        let (transfer_mode, region) = match &message.transfer {
            TransferSelector::Embedded => {
                info!("Using embedded frame transfer");
                (TransferMode::Embedded, None)
            }
            TransferSelector::SharedMemory {
                handle_name,
                length_bytes,
            } => {
                if !self.config.allow_shared_memory {
                    warn!(handle = %handle_name, "Shared memory transfer requested but disabled");
                    return Err(Error::TransferModeDisabled);
                }
                info!(
                    handle = %handle_name,
                    length_bytes,
                    "Using shared memory transfer"
                );
                let region = self.resolver.open(handle_name, *length_bytes)?;
                (TransferMode::SharedMemory, Some(region))
            }
            TransferSelector::Unrecognized(method) => {
                warn!(method = %method, "Unsupported data transfer method");
                return Err(Error::UnsupportedTransferMode(method.clone()));
            }
        };

        // A rejected format drops `region` here, releasing the mapping.
        let format = self.config.formats.check(&message.media)?;

        info!(
            width = format.width,
            height = format.height,
            pixel_format = %format.pixel_format,
            timescale = message.media.timescale,
            "Media stream negotiated"
        );

        Ok(Negotiated {
            transfer_mode,
            reply: NegotiatedReply {
                media: message.media.timescale_only(),
            },
            descriptor: message.media,
            format,
            region,
        })
    }
}
