//! Media format types and the supported-format predicate
//!
//! A session negotiates its [`MediaDescriptor`] once; every frame that
//! follows is interpreted against that descriptor.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel layout of raw video frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Unknown/unspecified format
    Unspecified,

    /// Packed 24-bit BGR (width * height * 3 bytes)
    Bgr24,

    /// Packed 24-bit RGB (width * height * 3 bytes)
    Rgb24,

    /// Packed 32-bit BGRA (width * height * 4 bytes)
    Bgra32,

    /// Packed 32-bit RGBA (width * height * 4 bytes)
    Rgba32,

    /// Single 8-bit luma plane (width * height bytes)
    Gray8,

    /// YUV 4:2:0 planar (width * height * 3/2 bytes)
    Yuv420p,

    /// Y plane + interleaved UV (width * height * 3/2 bytes)
    Nv12,
}

impl PixelFormat {
    /// Bytes occupied by one frame of the given dimensions
    pub fn frame_size(&self, width: u32, height: u32) -> u64 {
        let pixels = width as u64 * height as u64;
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => pixels * 3,
            PixelFormat::Bgra32 | PixelFormat::Rgba32 => pixels * 4,
            PixelFormat::Gray8 => pixels,
            PixelFormat::Yuv420p | PixelFormat::Nv12 => pixels * 3 / 2,
            PixelFormat::Unspecified => 0,
        }
    }

    /// Chroma-subsampled formats need even dimensions
    pub fn requires_even_dimensions(&self) -> bool {
        matches!(self, PixelFormat::Yuv420p | PixelFormat::Nv12)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Unspecified => "unspecified",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgra32 => "bgra32",
            PixelFormat::Rgba32 => "rgba32",
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Nv12 => "nv12",
        };
        f.write_str(name)
    }
}

/// Raw video sample format: dimensions plus pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrameFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl VideoFrameFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    /// Expected byte length of one frame
    pub fn frame_size(&self) -> u64 {
        self.pixel_format.frame_size(self.width, self.height)
    }
}

/// Media format declared by the client in the session preamble
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Ticks per second of the client's timestamp clock
    pub timescale: u64,

    /// Raw video format; `None` when the client declared no video sample format
    pub video: Option<VideoFrameFormat>,
}

impl MediaDescriptor {
    pub fn video(timescale: u64, format: VideoFrameFormat) -> Self {
        Self {
            timescale,
            video: Some(format),
        }
    }

    /// Descriptor echoed back at negotiation: timescale only
    pub fn timescale_only(&self) -> Self {
        Self {
            timescale: self.timescale,
            video: None,
        }
    }
}

/// Supported-format predicate applied at negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatPolicy {
    pub supported_pixel_formats: Vec<PixelFormat>,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self {
            supported_pixel_formats: vec![PixelFormat::Bgr24, PixelFormat::Rgb24],
            min_width: 1,
            min_height: 1,
            max_width: 4096,
            max_height: 4096,
        }
    }
}

impl FormatPolicy {
    /// Validate a declared descriptor, returning the video format it carries
    pub fn check(&self, descriptor: &MediaDescriptor) -> Result<VideoFrameFormat> {
        let format = descriptor.video.ok_or_else(|| {
            Error::UnsupportedFormat("media descriptor has no video frame sample format".into())
        })?;

        if !self.supported_pixel_formats.contains(&format.pixel_format) {
            return Err(Error::UnsupportedFormat(format!(
                "pixel format {} is not supported (supported: {})",
                format.pixel_format,
                self.supported_pixel_formats
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        if format.width < self.min_width
            || format.height < self.min_height
            || format.width > self.max_width
            || format.height > self.max_height
        {
            return Err(Error::UnsupportedFormat(format!(
                "resolution {}x{} outside supported range {}x{}..={}x{}",
                format.width,
                format.height,
                self.min_width,
                self.min_height,
                self.max_width,
                self.max_height
            )));
        }

        if format.pixel_format.requires_even_dimensions()
            && (format.width % 2 != 0 || format.height % 2 != 0)
        {
            return Err(Error::UnsupportedFormat(format!(
                "{} requires even dimensions, got {}x{}",
                format.pixel_format, format.width, format.height
            )));
        }

        Ok(format)
    }
}
