//! Fixed-size batch assembly
//!
//! Frames are admitted one at a time; when the batch reaches the
//! configured size it is handed back whole and the assembler starts over.

use crate::inference::Inference;
use crate::processor::Image;

/// A decoded frame waiting for inference
#[derive(Debug, Clone)]
pub struct BatchFrame {
    /// Client sequence number the frame arrived with
    pub sequence_number: u64,
    pub image: Image,
    /// Normalized upstream inferences carried by the frame
    pub upstream: Vec<Inference>,
}

/// A complete (or, on close, trailing) batch in admission order
#[derive(Debug, Clone)]
pub struct Batch {
    pub frames: Vec<BatchFrame>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn images(&self) -> Vec<Image> {
        self.frames.iter().map(|f| f.image.clone()).collect()
    }

    /// Client sequence number of the last admitted frame
    pub fn last_sequence(&self) -> Option<u64> {
        self.frames.last().map(|f| f.sequence_number)
    }

    /// Upstream inferences of every frame, in frame order
    pub fn upstream_inferences(&self) -> Vec<Inference> {
        self.frames
            .iter()
            .flat_map(|f| f.upstream.iter().cloned())
            .collect()
    }
}

#[derive(Debug)]
pub enum Admission {
    /// Batch still filling; respond with an acknowledgment only
    Pending,
    /// Batch complete; run inference on it
    ReadyToFlush(Batch),
}

#[derive(Debug)]
pub struct BatchAssembler {
    batch_size: usize,
    frames: Vec<BatchFrame>,
}

impl BatchAssembler {
    /// `batch_size` of 0 is treated as 1
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            frames: Vec::with_capacity(batch_size),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Frames currently held
    pub fn pending(&self) -> usize {
        self.frames.len()
    }

    pub fn admit(&mut self, frame: BatchFrame) -> Admission {
        self.frames.push(frame);
        if self.frames.len() < self.batch_size {
            return Admission::Pending;
        }
        let frames = std::mem::replace(&mut self.frames, Vec::with_capacity(self.batch_size));
        Admission::ReadyToFlush(Batch { frames })
    }

    /// Take whatever is buffered, leaving the assembler empty
    pub fn drain(&mut self) -> Option<Batch> {
        if self.frames.is_empty() {
            return None;
        }
        Some(Batch {
            frames: std::mem::take(&mut self.frames),
        })
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }
}
