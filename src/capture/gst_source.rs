// Camera capture using GStreamer
//
// Builds one pipeline per recording:
//
//   autovideosrc ! queue ! videoconvert ! [tee ! queue ! autovideosink]
//                                       ! queue ! vp9enc/vp8enc ! queue ! webmmux
//   autoaudiosrc ! queue ! audioconvert ! audioresample ! opusenc ! queue ! webmmux
//   webmmux (streamable) ! appsink
//
// The appsink callback accumulates the muxed bytestream and emits one
// fragment per chunk interval into the session's sink. VP9 is requested
// first; when the encoder element is missing the pipeline falls back to
// VP8 without surfacing an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::TrySendError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use parking_lot::Mutex;

use super::buffer::{Fragment, CHUNK_INTERVAL_MS};
use super::source::{CaptureError, FragmentSink, MediaSource, StreamHandle};
use super::RecordingCodec;

/// How long to wait for the pipeline to reach PLAYING before giving up
const START_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(10);

/// Target bitrate for the video encoder, bits per second
const VIDEO_BITRATE_BPS: i32 = 2_000_000;

/// Keyframe interval in frames, so every fragment boundary is seekable-ish
const KEYFRAME_MAX_DIST: i32 = 30;

/// GStreamer-backed camera/microphone source
pub struct GstCameraSource {
    preferred_codec: RecordingCodec,
    show_preview: bool,
    chunk_interval: Duration,
}

impl GstCameraSource {
    pub fn new(preferred_codec: RecordingCodec, show_preview: bool) -> Self {
        Self {
            preferred_codec,
            show_preview,
            chunk_interval: Duration::from_millis(CHUNK_INTERVAL_MS),
        }
    }
}

impl MediaSource for GstCameraSource {
    fn start(&mut self, sink: FragmentSink) -> Result<Box<dyn StreamHandle>, CaptureError> {
        gst::init().map_err(|e| CaptureError::Unknown(format!("gstreamer init: {e}")))?;

        let codec = negotiate_codec(self.preferred_codec)?;
        let mime_type = format!("video/webm;codecs={},opus", codec.codecs_param());
        log::info!("negotiated recording codec: {}", codec.codecs_param());

        let pipeline = build_pipeline(codec, self.show_preview, self.chunk_interval, sink)?;

        // Wait for the transition so a missing device or a denied
        // permission surfaces here, not as a silent dead stream.
        if pipeline.set_state(gst::State::Playing).is_err() {
            let error = drain_start_error(&pipeline);
            let _ = pipeline.set_state(gst::State::Null);
            return Err(error);
        }
        let (result, _, _) = pipeline.state(START_TIMEOUT);
        if result.is_err() {
            let error = drain_start_error(&pipeline);
            let _ = pipeline.set_state(gst::State::Null);
            return Err(error);
        }

        Ok(Box::new(GstStreamHandle {
            pipeline: Some(pipeline),
            mime_type,
        }))
    }
}

/// Live pipeline handle; stopping tears the pipeline down
struct GstStreamHandle {
    pipeline: Option<gst::Pipeline>,
    mime_type: String,
}

impl StreamHandle for GstStreamHandle {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn stop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                log::warn!("failed to tear down capture pipeline: {e}");
            }
        }
    }
}

impl Drop for GstStreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick the first available WebM encoder, preferred codec first
fn negotiate_codec(preferred: RecordingCodec) -> Result<RecordingCodec, CaptureError> {
    let order = match preferred {
        RecordingCodec::Vp9 => [RecordingCodec::Vp9, RecordingCodec::Vp8],
        RecordingCodec::Vp8 => [RecordingCodec::Vp8, RecordingCodec::Vp9],
    };
    for codec in order {
        if gst::ElementFactory::find(codec.encoder_element()).is_some() {
            return Ok(codec);
        }
    }
    Err(CaptureError::Unknown(
        "no WebM video encoder available".into(),
    ))
}

/// Groups muxed bytes into fixed-cadence fragments
struct FragmentChunker {
    pending: Vec<u8>,
    last_emit: Instant,
    interval: Duration,
    sink: FragmentSink,
}

impl FragmentChunker {
    fn new(interval: Duration, sink: FragmentSink) -> Self {
        Self {
            pending: Vec::new(),
            last_emit: Instant::now(),
            interval,
            sink,
        }
    }

    fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        if self.last_emit.elapsed() < self.interval || self.pending.is_empty() {
            return;
        }

        let payload = Bytes::from(std::mem::take(&mut self.pending));
        match self.sink.try_send(Fragment::new(payload)) {
            Ok(()) => {}
            Err(TrySendError::Full(fragment)) => {
                log::warn!(
                    "fragment queue full, dropping {} bytes of media",
                    fragment.payload.len()
                );
            }
            // Session is gone; the pipeline is about to be stopped
            Err(TrySendError::Disconnected(_)) => {}
        }
        self.last_emit = Instant::now();
    }
}

fn make_element(factory: &str) -> Result<gst::Element, CaptureError> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| CaptureError::Unknown(format!("failed to create {factory}: {e}")))
}

fn build_pipeline(
    codec: RecordingCodec,
    show_preview: bool,
    chunk_interval: Duration,
    sink: FragmentSink,
) -> Result<gst::Pipeline, CaptureError> {
    let pipeline = gst::Pipeline::new();

    // Video branch
    let videosrc = make_element("autovideosrc")?;
    let video_queue = make_element("queue")?;
    let videoconvert = make_element("videoconvert")?;
    let encode_queue = make_element("queue")?;
    let encoder = make_element(codec.encoder_element())?;
    configure_vpx_encoder(&encoder);
    let mux_queue = make_element("queue")?;

    // Audio branch
    let audiosrc = make_element("autoaudiosrc")?;
    let audio_queue = make_element("queue")?;
    let audioconvert = make_element("audioconvert")?;
    let audioresample = make_element("audioresample")?;
    let opusenc = make_element("opusenc")?;
    let audio_mux_queue = make_element("queue")?;

    // Muxer in streamable mode: no seekable header rewrite at EOS, the
    // bytestream is valid as it is produced.
    let muxer = make_element("webmmux")?;
    muxer.set_property("streamable", true);

    let appsink = gst_app::AppSink::builder().name("fragments").sync(false).build();

    pipeline
        .add_many([
            &videosrc,
            &video_queue,
            &videoconvert,
            &encode_queue,
            &encoder,
            &mux_queue,
            &audiosrc,
            &audio_queue,
            &audioconvert,
            &audioresample,
            &opusenc,
            &audio_mux_queue,
            &muxer,
            appsink.upcast_ref(),
        ])
        .map_err(|e| CaptureError::Unknown(format!("failed to add elements: {e}")))?;

    gst::Element::link_many([&videosrc, &video_queue, &videoconvert])
        .map_err(|e| CaptureError::Unknown(format!("failed to link video source: {e}")))?;

    if show_preview {
        // Split the converted video between the encoder and a local sink
        // so the user sees themselves while recording.
        let tee = make_element("tee")?;
        let preview_queue = make_element("queue")?;
        let preview_sink = make_element("autovideosink")?;
        preview_sink.set_property("sync", false);

        pipeline
            .add_many([&tee, &preview_queue, &preview_sink])
            .map_err(|e| CaptureError::Unknown(format!("failed to add preview branch: {e}")))?;
        gst::Element::link_many([&videoconvert, &tee])
            .and_then(|_| gst::Element::link_many([&tee, &encode_queue, &encoder, &mux_queue]))
            .and_then(|_| gst::Element::link_many([&tee, &preview_queue, &preview_sink]))
            .map_err(|e| CaptureError::Unknown(format!("failed to link preview branch: {e}")))?;
    } else {
        gst::Element::link_many([&videoconvert, &encode_queue, &encoder, &mux_queue])
            .map_err(|e| CaptureError::Unknown(format!("failed to link video encoder: {e}")))?;
    }

    // webmmux pads are requested on link
    mux_queue
        .link(&muxer)
        .map_err(|e| CaptureError::Unknown(format!("failed to link video to muxer: {e}")))?;

    gst::Element::link_many([
        &audiosrc,
        &audio_queue,
        &audioconvert,
        &audioresample,
        &opusenc,
        &audio_mux_queue,
    ])
    .map_err(|e| CaptureError::Unknown(format!("failed to link audio branch: {e}")))?;
    audio_mux_queue
        .link(&muxer)
        .map_err(|e| CaptureError::Unknown(format!("failed to link audio to muxer: {e}")))?;

    muxer
        .link(appsink.upcast_ref::<gst::Element>())
        .map_err(|e| CaptureError::Unknown(format!("failed to link muxer to appsink: {e}")))?;

    let chunker = Arc::new(Mutex::new(FragmentChunker::new(chunk_interval, sink)));
    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| match sink.pull_sample() {
                Ok(sample) => {
                    if let Some(buffer) = sample.buffer() {
                        if let Ok(map) = buffer.map_readable() {
                            chunker.lock().push(map.as_slice());
                        }
                    }
                    Ok(gst::FlowSuccess::Ok)
                }
                Err(_) => Err(gst::FlowError::Error),
            })
            .build(),
    );

    Ok(pipeline)
}

fn configure_vpx_encoder(encoder: &gst::Element) {
    // Realtime deadline; without it libvpx buffers far more than a live
    // capture can tolerate.
    encoder.set_property_from_str("deadline", "1");
    encoder.set_property("cpu-used", 8i32);
    encoder.set_property("target-bitrate", VIDEO_BITRATE_BPS);
    encoder.set_property("keyframe-max-dist", KEYFRAME_MAX_DIST);
    encoder.set_property_from_str("end-usage", "cbr");
}

/// Pull the most descriptive error off the bus and map it onto the
/// capture taxonomy.
fn drain_start_error(pipeline: &gst::Pipeline) -> CaptureError {
    let Some(bus) = pipeline.bus() else {
        return CaptureError::Unknown("pipeline failed to start".into());
    };

    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
        if let gst::MessageView::Error(err) = msg.view() {
            return classify_error(&err.error());
        }
    }
    CaptureError::Unknown("pipeline failed to start".into())
}

fn classify_error(error: &gst::glib::Error) -> CaptureError {
    match error.kind::<gst::ResourceError>() {
        Some(gst::ResourceError::NotFound) => CaptureError::DeviceNotFound,
        Some(gst::ResourceError::OpenRead)
        | Some(gst::ResourceError::OpenWrite)
        | Some(gst::ResourceError::OpenReadWrite)
        | Some(gst::ResourceError::NotAuthorized) => CaptureError::PermissionDenied,
        _ => CaptureError::Unknown(error.to_string()),
    }
}
