// Media source abstraction
//
// A MediaSource acquires the camera/microphone and delivers encoded
// fragments to the session's sink until its handle is stopped. The
// GStreamer-backed implementation lives in gst_source; tests drive the
// session through scripted sources instead.

use crossbeam_channel::Sender;

use super::buffer::Fragment;

/// Error type for stream acquisition
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The user refused camera/microphone access
    #[error("camera/microphone permission denied")]
    PermissionDenied,

    /// No capture device is attached
    #[error("no camera found")]
    DeviceNotFound,

    /// A recording is already in progress
    #[error("already recording")]
    AlreadyRecording,

    /// Anything the platform reports that we cannot classify
    #[error("capture failed: {0}")]
    Unknown(String),
}

/// Where a source delivers its fragments
pub type FragmentSink = Sender<Fragment>;

/// Live stream handle, exclusively owned by the recording session
pub trait StreamHandle: Send {
    /// Negotiated container/codec MIME type, e.g. "video/webm;codecs=vp9,opus"
    fn mime_type(&self) -> &str;

    /// Release the underlying hardware. Idempotent: safe to call on an
    /// already-stopped handle.
    fn stop(&mut self);
}

pub trait MediaSource {
    /// Acquire the camera/microphone and start delivering fragments to
    /// `sink` on the chunk cadence, in capture order.
    fn start(&mut self, sink: FragmentSink) -> Result<Box<dyn StreamHandle>, CaptureError>;
}
