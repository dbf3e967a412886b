// Continuous capture engine
//
// Start a recording and fragments flow into the rolling buffer; saving
// cuts the trailing window into a clip; clips accumulate in the session
// until they are published or discarded.

pub mod buffer;
pub mod clip;
pub mod gst_source;
pub mod session;
pub mod source;

pub use buffer::{ChunkBuffer, Fragment, CHUNK_INTERVAL_MS, WINDOW_DURATION_MS};
pub use clip::{Clip, ClipId, ExtractError};
pub use gst_source::GstCameraSource;
pub use session::{CaptureSession, ClipSession, SessionError};
pub use source::{CaptureError, FragmentSink, MediaSource, StreamHandle};

use serde::{Deserialize, Serialize};

/// Recording codec preference. Whichever is requested, the source falls
/// back to the other when the encoder element is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingCodec {
    Vp9,
    Vp8,
}

impl RecordingCodec {
    /// GStreamer encoder element for this codec
    pub fn encoder_element(&self) -> &'static str {
        match self {
            RecordingCodec::Vp9 => "vp9enc",
            RecordingCodec::Vp8 => "vp8enc",
        }
    }

    /// Codec name as used in a WebM MIME `codecs` parameter
    pub fn codecs_param(&self) -> &'static str {
        match self {
            RecordingCodec::Vp9 => "vp9",
            RecordingCodec::Vp8 => "vp8",
        }
    }
}

impl Default for RecordingCodec {
    fn default() -> Self {
        Self::Vp9
    }
}
