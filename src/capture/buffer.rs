// Rolling fragment buffer for continuous capture
//
// Holds the trailing window of encoded media that a clip can be cut from.
// Eviction happens on every push, so the buffer needs no background task
// and is bounded by window / cadence entries in steady state.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Length of the trailing window a clip is cut from
pub const WINDOW_DURATION_MS: u64 = 60_000;

/// Cadence at which the recorder delivers fragments
pub const CHUNK_INTERVAL_MS: u64 = 1_000;

/// One encoded media fragment as delivered by the recorder
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Opaque encoded bytes (muxed WebM stream data)
    pub payload: Bytes,
    /// Wall clock time when the fragment was captured (used for eviction)
    pub captured_at: Instant,
}

impl Fragment {
    /// Fragment captured now
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            captured_at: Instant::now(),
        }
    }

    /// Fragment with an explicit capture time
    pub fn at(payload: Bytes, captured_at: Instant) -> Self {
        Self {
            payload,
            captured_at,
        }
    }
}

/// Rolling buffer of the most recent fragments
pub struct ChunkBuffer {
    fragments: VecDeque<Fragment>,
    window: Duration,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::with_window(Duration::from_millis(WINDOW_DURATION_MS))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            fragments: VecDeque::new(),
            window,
        }
    }

    /// Append a fragment, then evict everything older than the window
    pub fn push(&mut self, fragment: Fragment) {
        self.fragments.push_back(fragment);
        self.trim();
    }

    fn trim(&mut self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };
        while let Some(front) = self.fragments.front() {
            if front.captured_at < cutoff {
                self.fragments.pop_front();
            } else {
                break;
            }
        }
    }

    /// Copy out the current contents, oldest first, without mutating them
    pub fn snapshot(&self) -> Vec<Fragment> {
        self.fragments.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Drop everything buffered so far
    pub fn reset(&mut self) {
        self.fragments.clear();
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag_secs_ago(secs: u64) -> Fragment {
        Fragment::at(
            Bytes::from_static(b"chunk"),
            Instant::now() - Duration::from_secs(secs),
        )
    }

    #[test]
    fn retains_only_the_trailing_window() {
        let mut buffer = ChunkBuffer::new();
        // 65 one-second arrivals, offset half an interval so no fragment
        // sits exactly on the eviction boundary
        for i in 0..65u64 {
            buffer.push(Fragment::at(
                Bytes::from_static(b"chunk"),
                Instant::now() - Duration::from_millis((65 - i) * 1000 - 500),
            ));
        }
        assert_eq!(buffer.len(), 60);

        let cutoff = Instant::now() - Duration::from_millis(WINDOW_DURATION_MS);
        for fragment in buffer.snapshot() {
            assert!(fragment.captured_at >= cutoff);
        }
    }

    #[test]
    fn eviction_happens_on_ingestion_after_a_pause() {
        let mut buffer = ChunkBuffer::new();
        for i in 0..5u64 {
            buffer.push(frag_secs_ago(120 - i));
        }
        // Nothing evicts until the next arrival
        assert_eq!(buffer.len(), 5);

        buffer.push(frag_secs_ago(0));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn snapshot_preserves_capture_order_and_contents() {
        let mut buffer = ChunkBuffer::new();
        for i in 0..3u64 {
            buffer.push(Fragment::at(
                Bytes::from(vec![i as u8]),
                Instant::now() - Duration::from_secs(3 - i),
            ));
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 3);
        for (i, fragment) in snapshot.iter().enumerate() {
            assert_eq!(fragment.payload.as_ref(), &[i as u8]);
        }
        // Read-only: the buffer is unchanged
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn reset_empties_the_buffer() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(frag_secs_ago(1));
        buffer.push(frag_secs_ago(0));
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(buffer.snapshot().is_empty());
    }
}
