// Lance Certo capture engine
// Main library entry point
//
// Continuous camera capture with a rolling 60-second buffer, on-demand
// clip extraction, thumbnail derivation, and multipart publishing to the
// Lance Certo backend. The UI shell stays outside this crate; a shell
// drives everything through CaptureSession and UploadCoordinator.

pub mod api;
pub mod capture;
pub mod config;
pub mod thumbnail;
pub mod upload;

pub use api::{ApiClient, ApiError, Momento, MomentoApi};
pub use capture::{
    CaptureError, CaptureSession, Clip, ClipId, ClipSession, ExtractError, FragmentSink,
    GstCameraSource, MediaSource, RecordingCodec, StreamHandle,
};
pub use config::Config;
pub use thumbnail::{DecodeError, FrameDecoder, GstFrameDecoder, ThumbnailOptions};
pub use upload::{PublishError, PublishOutcome, UploadCoordinator, UploadDraft};
