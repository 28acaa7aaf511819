//! Default collaborators shipped with the server binary
//!
//! [`RawFrameDecoder`] accepts uncompressed frames in the negotiated pixel
//! format. [`MeanIntensityClassifier`] is a reference model that labels
//! each image `bright` or `dark`; real deployments replace it with their
//! own [`InferenceEngine`].

use async_trait::async_trait;
use bytes::Bytes;
use mediagraph_core::inference::Tag;
use mediagraph_core::{
    Error, FrameDecoder, Image, Inference, InferenceEngine, PixelFormat, Result, VideoFrameFormat,
};

/// Copies raw pixel bytes into an owned [`Image`]
///
/// The copy matters for shared memory sessions: the borrowed view is only
/// valid until the next frame is read.
#[derive(Debug, Default)]
pub struct RawFrameDecoder;

#[async_trait]
impl FrameDecoder for RawFrameDecoder {
    async fn decode(&self, bytes: &[u8], format: &VideoFrameFormat) -> Result<Image> {
        let expected = format.frame_size();
        if bytes.len() as u64 != expected {
            return Err(Error::Decode(format!(
                "{}x{} {} frame needs {} bytes, got {}",
                format.width,
                format.height,
                format.pixel_format,
                expected,
                bytes.len()
            )));
        }
        Ok(Image::new(*format, Bytes::copy_from_slice(bytes)))
    }
}

/// Labels images by mean sample intensity
#[derive(Debug)]
pub struct MeanIntensityClassifier {
    threshold: u8,
}

impl MeanIntensityClassifier {
    pub const SUBTYPE: &'static str = "intensity";

    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    fn classify(&self, image: &Image) -> Inference {
        let mean = mean_intensity(image);
        let (label, confidence) = if mean >= self.threshold as f32 {
            ("bright", mean / 255.0)
        } else {
            ("dark", 1.0 - mean / 255.0)
        };
        Inference::classification(Tag::new(label, confidence)).with_subtype(Self::SUBTYPE)
    }
}

impl Default for MeanIntensityClassifier {
    fn default() -> Self {
        Self::new(128)
    }
}

#[async_trait]
impl InferenceEngine for MeanIntensityClassifier {
    async fn infer(&self, images: &[Image]) -> Result<Vec<Inference>> {
        Ok(images.iter().map(|image| self.classify(image)).collect())
    }
}

/// Mean over color samples; alpha is skipped and planar YUV uses luma only
fn mean_intensity(image: &Image) -> f32 {
    let pixels = image.pixels.as_ref();
    let (sum, count) = match image.format.pixel_format {
        PixelFormat::Bgra32 | PixelFormat::Rgba32 => {
            pixels.chunks_exact(4).fold((0u64, 0u64), |(sum, count), px| {
                (sum + px[0] as u64 + px[1] as u64 + px[2] as u64, count + 3)
            })
        }
        PixelFormat::Yuv420p | PixelFormat::Nv12 => {
            let luma = (image.width() as usize * image.height() as usize).min(pixels.len());
            sum_samples(&pixels[..luma])
        }
        _ => sum_samples(pixels),
    };

    if count == 0 {
        0.0
    } else {
        sum as f32 / count as f32
    }
}

fn sum_samples(samples: &[u8]) -> (u64, u64) {
    (
        samples.iter().map(|&s| s as u64).sum(),
        samples.len() as u64,
    )
}
