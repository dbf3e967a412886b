// Thumbnail derivation
//
// Decodes one representative frame from a clip and encodes it as a JPEG
// suitable for upload. The decode step sits behind a capability trait so
// the backend can move off GStreamer without touching callers.

pub mod gst_decoder;

pub use gst_decoder::GstFrameDecoder;

use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::ImageEncoder;

use crate::capture::Clip;

/// Error type for thumbnail derivation. Every decode, seek, or encode
/// failure collapses into this; callers treat it as non-fatal.
#[derive(Debug, thiserror::Error)]
#[error("thumbnail decode failed: {0}")]
pub struct DecodeError(pub String);

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        DecodeError(e.to_string())
    }
}

/// Default offset into the clip for the representative frame. Not zero:
/// the first frame of a fresh encoder stream is often black.
pub const FRAME_OFFSET: Duration = Duration::from_millis(500);

/// Default JPEG quality factor for encoded thumbnails
pub const JPEG_QUALITY: u8 = 80;

/// Knobs for thumbnail derivation
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailOptions {
    /// Where in the clip to grab the representative frame
    pub frame_offset: Duration,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            frame_offset: FRAME_OFFSET,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

/// One decoded frame in packed RGB, tightly rowed
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Capability interface for decoding a frame out of an encoded payload
pub trait FrameDecoder {
    fn decode_frame(&self, payload: &[u8], offset: Duration) -> Result<RawFrame, DecodeError>;
}

/// A named, encoded still image ready for multipart upload
pub struct ImageArtifact {
    pub file_name: String,
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

/// Derive an uploadable JPEG thumbnail from a clip
pub fn derive_thumbnail(
    decoder: &dyn FrameDecoder,
    clip: &Clip,
    options: ThumbnailOptions,
) -> Result<ImageArtifact, DecodeError> {
    let frame = decoder.decode_frame(clip.payload(), options.frame_offset)?;
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return Err(DecodeError(format!(
            "decoder returned {} bytes for a {}x{} RGB frame",
            frame.data.len(),
            frame.width,
            frame.height
        )));
    }

    let mut data = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut data, options.jpeg_quality);
    encoder
        .write_image(
            &frame.data,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| DecodeError(format!("jpeg encode: {e}")))?;

    Ok(ImageArtifact {
        file_name: format!("thumb_{}.jpg", clip.id()),
        mime_type: "image/jpeg",
        data,
    })
}
