// GStreamer-backed frame decoding
//
// Pipeline: filesrc → decodebin → videoconvert → appsink (RGB)
//
// The clip payload is staged in a temp file because filesrc wants a
// path. decodebin auto-detects the WebM/VP8/VP9 stream; videoconvert
// normalizes whatever the decoder emits to packed RGB. Every wait on
// the pipeline is bounded, and the pipeline is torn down on success and
// failure alike.

use std::io::Write;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::{DecodeError, FrameDecoder, RawFrame};

/// How long to wait for decodebin to preroll
const PREROLL_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(10);

/// How long to wait for a seek to settle or a frame to arrive
const FRAME_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(5);

/// Frame decoder running a short-lived GStreamer decode pipeline per call
#[derive(Debug, Default)]
pub struct GstFrameDecoder;

impl GstFrameDecoder {
    pub fn new() -> Self {
        Self
    }
}

/// Sets the pipeline to NULL when the decode scope exits, whatever path
/// it exits through.
struct PipelineGuard(gst::Pipeline);

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        let _ = self.0.set_state(gst::State::Null);
    }
}

impl FrameDecoder for GstFrameDecoder {
    fn decode_frame(&self, payload: &[u8], offset: Duration) -> Result<RawFrame, DecodeError> {
        gst::init().map_err(|e| DecodeError(format!("gstreamer init: {e}")))?;

        // Stage the payload for filesrc
        let mut stage = tempfile::NamedTempFile::new()?;
        stage.write_all(payload)?;
        stage.flush()?;

        let pipeline = gst::Pipeline::new();

        let filesrc = gst::ElementFactory::make("filesrc")
            .property("location", stage.path().to_string_lossy().to_string())
            .build()
            .map_err(|e| DecodeError(format!("failed to create filesrc: {e}")))?;

        let decodebin = gst::ElementFactory::make("decodebin")
            .build()
            .map_err(|e| DecodeError(format!("failed to create decodebin: {e}")))?;

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| DecodeError(format!("failed to create videoconvert: {e}")))?;

        let caps = gst::Caps::builder("video/x-raw").field("format", "RGB").build();
        let appsink = gst_app::AppSink::builder().name("frame").caps(&caps).sync(false).build();

        pipeline
            .add_many([&filesrc, &decodebin, &videoconvert, appsink.upcast_ref()])
            .map_err(|e| DecodeError(format!("failed to add elements: {e}")))?;

        filesrc
            .link(&decodebin)
            .map_err(|e| DecodeError(format!("failed to link filesrc to decodebin: {e}")))?;
        videoconvert
            .link(appsink.upcast_ref::<gst::Element>())
            .map_err(|e| DecodeError(format!("failed to link videoconvert to appsink: {e}")))?;

        // decodebin pads appear once the stream is parsed; only the video
        // pad gets linked through.
        let videoconvert_weak = videoconvert.downgrade();
        decodebin.connect_pad_added(move |_decodebin, src_pad| {
            let Some(videoconvert) = videoconvert_weak.upgrade() else {
                return;
            };
            let caps = src_pad
                .current_caps()
                .or_else(|| Some(src_pad.query_caps(None)));
            if let Some(caps) = caps {
                if let Some(structure) = caps.structure(0) {
                    if structure.name().as_str().starts_with("video/") {
                        if let Some(sink_pad) = videoconvert.static_pad("sink") {
                            if !sink_pad.is_linked() {
                                if let Err(e) = src_pad.link(&sink_pad) {
                                    log::warn!("failed to link decoded video pad: {e:?}");
                                }
                            }
                        }
                    }
                }
            }
        });

        let guard = PipelineGuard(pipeline);
        let pipeline = &guard.0;

        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| DecodeError(format!("failed to pause pipeline: {e:?}")))?;
        wait_for_preroll(pipeline, PREROLL_TIMEOUT)?;

        // Seek to the representative frame unless the clip is shorter
        // than the offset; a too-short clip just uses its first frame.
        let offset = gst::ClockTime::from_nseconds(offset.as_nanos() as u64);
        let duration = pipeline.query_duration::<gst::ClockTime>();
        if offset > gst::ClockTime::ZERO && duration.map_or(true, |d| offset < d) {
            pipeline
                .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, offset)
                .map_err(|e| DecodeError(format!("seek failed: {e:?}")))?;
            wait_for_preroll(pipeline, FRAME_TIMEOUT)?;
        }

        let sample = appsink
            .try_pull_preroll(FRAME_TIMEOUT)
            .ok_or_else(|| DecodeError("no frame decoded before timeout".into()))?;

        let caps = sample
            .caps()
            .ok_or_else(|| DecodeError("no caps on decoded sample".into()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| DecodeError(format!("unreadable caps on decoded sample: {e}")))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| DecodeError("no buffer in decoded sample".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| DecodeError(format!("failed to map decoded frame: {e}")))?;

        // Copy row by row: GStreamer strides are padded, image buffers
        // are tight.
        let width = info.width();
        let height = info.height();
        let stride = info.stride()[0] as usize;
        let row = width as usize * 3;
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            let end = start + row;
            if end > map.len() {
                return Err(DecodeError("decoded frame shorter than its caps".into()));
            }
            data.extend_from_slice(&map[start..end]);
        }

        Ok(RawFrame {
            width,
            height,
            data,
        })
    }
}

/// Block until the pipeline prerolls, fails, or the timeout passes
fn wait_for_preroll(pipeline: &gst::Pipeline, timeout: gst::ClockTime) -> Result<(), DecodeError> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| DecodeError("pipeline has no bus".into()))?;

    for msg in bus.iter_timed(timeout) {
        match msg.view() {
            gst::MessageView::AsyncDone(_) => return Ok(()),
            gst::MessageView::Error(err) => {
                return Err(DecodeError(format!(
                    "pipeline error: {} ({:?})",
                    err.error(),
                    err.debug()
                )));
            }
            _ => {}
        }
    }
    Err(DecodeError("decode timed out".into()))
}
