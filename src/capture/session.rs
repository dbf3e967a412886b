// Capture session state
//
// CaptureSession owns the live recording (stream handle, fragment pump,
// rolling buffer); ClipSession owns the clips saved during it. All
// mutation goes through these methods, which keeps the eviction and
// extraction logic unit-testable without a UI harness.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use super::buffer::{ChunkBuffer, Fragment};
use super::clip::{Clip, ClipId, ExtractError};
use super::source::{CaptureError, MediaSource, StreamHandle};

/// Fragments in flight between the recorder callback and the pump
const FRAGMENT_QUEUE_DEPTH: usize = 16;

/// How long the pump waits before rechecking its stop flag
const PUMP_IDLE_WAIT: Duration = Duration::from_millis(100);

/// MIME type reported when no recording has negotiated one
const DEFAULT_MIME_TYPE: &str = "video/webm";

/// Error type for clip-session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown clip id: {0}")]
    UnknownClip(ClipId),
}

/// Clips saved during one recording, in save order, with id-based selection
#[derive(Default)]
pub struct ClipSession {
    clips: Vec<Clip>,
    selected: HashSet<ClipId>,
}

impl ClipSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clip in save order
    pub fn add_clip(&mut self, clip: Clip) {
        self.clips.push(clip);
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn get(&self, id: ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Flip selection membership for a clip
    pub fn toggle_select(&mut self, id: ClipId) -> Result<(), SessionError> {
        if !self.clips.iter().any(|c| c.id() == id) {
            return Err(SessionError::UnknownClip(id));
        }
        if !self.selected.remove(&id) {
            self.selected.insert(id);
        }
        Ok(())
    }

    pub fn is_selected(&self, id: ClipId) -> bool {
        self.selected.contains(&id)
    }

    /// Remove a clip from the list and the selection set, releasing its
    /// preview resource. Operates on id, never on position.
    pub fn delete_clip(&mut self, id: ClipId) -> Result<(), SessionError> {
        let index = self
            .clips
            .iter()
            .position(|c| c.id() == id)
            .ok_or(SessionError::UnknownClip(id))?;
        self.selected.remove(&id);
        let mut clip = self.clips.remove(index);
        clip.release_preview();
        Ok(())
    }

    /// Selected clips in save order
    pub fn selected_clips(&self) -> Vec<&Clip> {
        self.clips
            .iter()
            .filter(|c| self.selected.contains(&c.id()))
            .collect()
    }

    /// Release every preview and drop all state
    pub fn clear(&mut self) {
        for clip in &mut self.clips {
            clip.release_preview();
        }
        self.clips.clear();
        self.selected.clear();
    }
}

/// Handle to the live recording: stream, pump thread, timing
struct ActiveRecording {
    handle: Box<dyn StreamHandle>,
    mime_type: String,
    started_at: Instant,
    stop_flag: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

/// Owned state for the capture flow: one optional live recording, the
/// rolling buffer it feeds, and the clips saved so far.
pub struct CaptureSession {
    buffer: Arc<Mutex<ChunkBuffer>>,
    recording: Option<ActiveRecording>,
    clips: ClipSession,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(ChunkBuffer::new())),
            recording: None,
            clips: ClipSession::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Seconds since recording started, 0 when idle
    pub fn elapsed_seconds(&self) -> u64 {
        self.recording
            .as_ref()
            .map(|r| r.started_at.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Number of fragments currently buffered
    pub fn buffered_fragments(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn clips(&self) -> &ClipSession {
        &self.clips
    }

    pub fn clips_mut(&mut self) -> &mut ClipSession {
        &mut self.clips
    }

    /// Start capturing from the given source. Fails if a recording is
    /// already in progress; the buffer starts empty.
    pub fn start_recording(&mut self, source: &mut dyn MediaSource) -> Result<(), CaptureError> {
        if self.recording.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let (sink, fragments) = bounded(FRAGMENT_QUEUE_DEPTH);
        let handle = source.start(sink)?;
        let mime_type = handle.mime_type().to_string();

        self.buffer.lock().reset();

        let stop_flag = Arc::new(AtomicBool::new(false));
        let pump = spawn_pump(fragments, Arc::clone(&self.buffer), Arc::clone(&stop_flag));

        log::info!("recording started ({mime_type})");
        self.recording = Some(ActiveRecording {
            handle,
            mime_type,
            started_at: Instant::now(),
            stop_flag,
            pump: Some(pump),
        });
        Ok(())
    }

    /// Stop capturing and clear the buffer. Already-extracted clips are
    /// unaffected. Safe to call when idle.
    pub fn stop_recording(&mut self) {
        if let Some(mut recording) = self.recording.take() {
            recording.handle.stop();
            recording.stop_flag.store(true, Ordering::Relaxed);
            if let Some(pump) = recording.pump.take() {
                let _ = pump.join();
            }
            self.buffer.lock().reset();
            log::info!("recording stopped");
        }
    }

    /// Cut the current trailing window into a clip and add it to the session
    pub fn save_clip(&mut self) -> Result<ClipId, ExtractError> {
        let mime_type = self
            .recording
            .as_ref()
            .map(|r| r.mime_type.as_str())
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();

        // Point-in-time copy: a fragment arriving after this line goes
        // into the buffer, not into this clip.
        let snapshot = self.buffer.lock().snapshot();
        let clip = Clip::extract(&snapshot, &mime_type)?;
        let id = clip.id();
        log::debug!(
            "saved clip {id}: {}s, {} bytes",
            clip.duration_seconds(),
            clip.size_bytes()
        );
        self.clips.add_clip(clip);
        Ok(id)
    }

    /// Deliver one fragment the way the recorder pump would
    #[cfg(test)]
    fn ingest_fragment(&self, fragment: Fragment) {
        self.buffer.lock().push(fragment);
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // Unmount releases the stream even if the caller forgot to stop
        self.stop_recording();
    }
}

fn spawn_pump(
    fragments: Receiver<Fragment>,
    buffer: Arc<Mutex<ChunkBuffer>>,
    stop_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }
        match fragments.recv_timeout(PUMP_IDLE_WAIT) {
            Ok(fragment) => buffer.lock().push(fragment),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::FragmentSink;
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_clip(tag: &str) -> Clip {
        let fragment = Fragment::new(Bytes::from(tag.as_bytes().to_vec()));
        Clip::extract(&[fragment], "video/webm").unwrap()
    }

    #[test]
    fn clips_keep_save_order_and_delete_by_id() {
        let mut session = ClipSession::new();
        let first = make_clip("first");
        let second = make_clip("second");
        let third = make_clip("third");
        let (id1, id2, id3) = (first.id(), second.id(), third.id());

        session.add_clip(first);
        session.add_clip(second);
        session.add_clip(third);
        assert_eq!(session.len(), 3);

        session.delete_clip(id2).unwrap();
        let remaining: Vec<ClipId> = session.clips().iter().map(|c| c.id()).collect();
        assert_eq!(remaining, vec![id1, id3]);

        // Deleting again reports the unknown id
        assert!(matches!(
            session.delete_clip(id2),
            Err(SessionError::UnknownClip(_))
        ));
    }

    #[test]
    fn toggle_select_flips_membership_and_rejects_unknown_ids() {
        let mut session = ClipSession::new();
        let clip = make_clip("clip");
        let id = clip.id();
        session.add_clip(clip);

        session.toggle_select(id).unwrap();
        assert!(session.is_selected(id));
        session.toggle_select(id).unwrap();
        assert!(!session.is_selected(id));

        let ghost = make_clip("ghost").id();
        assert!(matches!(
            session.toggle_select(ghost),
            Err(SessionError::UnknownClip(_))
        ));
    }

    #[test]
    fn deleting_a_selected_clip_also_deselects_it() {
        let mut session = ClipSession::new();
        let clip = make_clip("clip");
        let id = clip.id();
        session.add_clip(clip);
        session.toggle_select(id).unwrap();

        session.delete_clip(id).unwrap();
        assert!(!session.is_selected(id));
        assert!(session.selected_clips().is_empty());
    }

    #[test]
    fn selection_stays_a_subset_under_random_interleavings() {
        let mut rng = StdRng::seed_from_u64(0x1a5ce);
        let mut session = ClipSession::new();
        let mut known: Vec<ClipId> = Vec::new();

        for step in 0..500 {
            match rng.random_range(0..3u8) {
                0 => {
                    let clip = make_clip("clip");
                    known.push(clip.id());
                    session.add_clip(clip);
                }
                1 if !known.is_empty() => {
                    let id = known[rng.random_range(0..known.len())];
                    // May target an already-deleted clip; both outcomes are fine
                    let _ = session.toggle_select(id);
                }
                2 if !known.is_empty() => {
                    let id = known[rng.random_range(0..known.len())];
                    let _ = session.delete_clip(id);
                }
                _ => {}
            }

            let live: HashSet<ClipId> = session.clips().iter().map(|c| c.id()).collect();
            for clip in session.selected_clips() {
                assert!(
                    live.contains(&clip.id()),
                    "selection left dangling id at step {step}"
                );
            }
            for id in &known {
                if session.is_selected(*id) {
                    assert!(live.contains(id), "selected id not live at step {step}");
                }
            }
        }
    }

    #[test]
    fn selected_clips_come_back_in_save_order() {
        let mut session = ClipSession::new();
        let ids: Vec<ClipId> = (0..4)
            .map(|_| {
                let clip = make_clip("clip");
                let id = clip.id();
                session.add_clip(clip);
                id
            })
            .collect();

        // Select out of order
        session.toggle_select(ids[2]).unwrap();
        session.toggle_select(ids[0]).unwrap();
        session.toggle_select(ids[3]).unwrap();

        let selected: Vec<ClipId> = session.selected_clips().iter().map(|c| c.id()).collect();
        assert_eq!(selected, vec![ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn clear_releases_previews_and_empties_state() {
        let mut session = ClipSession::new();
        let mut clip = make_clip("clip");
        let path = clip.preview_path().unwrap().to_path_buf();
        let id = clip.id();
        session.add_clip(clip);
        session.toggle_select(id).unwrap();

        session.clear();
        assert!(session.is_empty());
        assert!(session.selected_clips().is_empty());
        assert!(!path.exists());
    }

    // Scripted source for exercising the recording flow without hardware

    struct ScriptedHandle;

    impl StreamHandle for ScriptedHandle {
        fn mime_type(&self) -> &str {
            "video/webm;codecs=vp9,opus"
        }

        fn stop(&mut self) {}
    }

    #[derive(Default)]
    struct ScriptedSource {
        sink: Option<FragmentSink>,
    }

    impl MediaSource for ScriptedSource {
        fn start(&mut self, sink: FragmentSink) -> Result<Box<dyn StreamHandle>, CaptureError> {
            self.sink = Some(sink);
            Ok(Box::new(ScriptedHandle))
        }
    }

    #[test]
    fn save_clip_uses_the_negotiated_mime_type() {
        let mut source = ScriptedSource::default();
        let mut session = CaptureSession::new();
        session.start_recording(&mut source).unwrap();

        session.ingest_fragment(Fragment::new(Bytes::from_static(b"data")));
        let id = session.save_clip().unwrap();
        let clip = session.clips().get(id).unwrap();
        assert_eq!(clip.mime_type(), "video/webm;codecs=vp9,opus");
    }

    #[test]
    fn starting_twice_is_rejected() {
        let mut source = ScriptedSource::default();
        let mut session = CaptureSession::new();
        session.start_recording(&mut source).unwrap();

        let mut second = ScriptedSource::default();
        assert!(matches!(
            session.start_recording(&mut second),
            Err(CaptureError::AlreadyRecording)
        ));
    }

    #[test]
    fn save_before_any_fragment_reports_no_data() {
        let mut source = ScriptedSource::default();
        let mut session = CaptureSession::new();
        session.start_recording(&mut source).unwrap();
        assert!(matches!(session.save_clip(), Err(ExtractError::NoDataYet)));
    }

    #[test]
    fn stop_clears_the_buffer_but_keeps_clips() {
        let mut source = ScriptedSource::default();
        let mut session = CaptureSession::new();
        session.start_recording(&mut source).unwrap();

        session.ingest_fragment(Fragment::new(Bytes::from_static(b"data")));
        let id = session.save_clip().unwrap();

        session.stop_recording();
        assert!(!session.is_recording());
        assert_eq!(session.buffered_fragments(), 0);
        assert!(session.clips().get(id).is_some());

        // Idempotent
        session.stop_recording();
    }

    #[test]
    fn a_minute_of_backlog_yields_a_sixty_second_clip() {
        let mut source = ScriptedSource::default();
        let mut session = CaptureSession::new();
        session.start_recording(&mut source).unwrap();

        // 65 one-second arrivals, offset half an interval so the oldest
        // five fall cleanly out of the window
        for i in 0..65u64 {
            session.ingest_fragment(Fragment::at(
                Bytes::from_static(b"frag"),
                Instant::now() - Duration::from_millis((65 - i) * 1000 - 500),
            ));
        }

        assert_eq!(session.buffered_fragments(), 60);
        let id = session.save_clip().unwrap();
        assert_eq!(session.clips().get(id).unwrap().duration_seconds(), 60);
    }

    #[test]
    fn pump_delivers_fragments_in_order() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut source = ScriptedSource::default();
        let mut session = CaptureSession::new();
        session.start_recording(&mut source).unwrap();

        let sink = source.sink.clone().unwrap();
        for i in 0..3u8 {
            sink.send(Fragment::new(Bytes::from(vec![i]))).unwrap();
        }

        // The pump thread drains the channel asynchronously
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.buffered_fragments() < 3 {
            assert!(Instant::now() < deadline, "pump never delivered fragments");
            std::thread::sleep(Duration::from_millis(10));
        }

        let id = session.save_clip().unwrap();
        let clip = session.clips().get(id).unwrap();
        assert_eq!(clip.payload().as_ref(), &[0u8, 1, 2]);
    }
}
