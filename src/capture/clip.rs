// Clip extraction from the rolling buffer
//
// A clip is a point-in-time copy of the buffer contents. Extraction never
// consumes the buffer: recording continues, and a later save may reuse
// fragments that are already part of an earlier clip.

use std::io::Write;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::buffer::{Fragment, CHUNK_INTERVAL_MS};

/// Error type for clip extraction
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Save was triggered before the first fragment arrived
    #[error("no media captured yet")]
    NoDataYet,
}

/// Identifier for a clip within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClipId(Uuid);

impl ClipId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ClipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A standalone clip cut from the rolling buffer.
///
/// The payload is immutable after extraction; mutating or resetting the
/// buffer afterwards cannot touch it.
pub struct Clip {
    id: ClipId,
    payload: Bytes,
    mime_type: String,
    duration_seconds: u32,
    created_at: DateTime<Utc>,
    /// Temp file holding the payload for playback, created on first use
    preview: Option<tempfile::NamedTempFile>,
}

impl Clip {
    /// Cut a clip from a buffer snapshot.
    ///
    /// Duration is the chunk-count approximation (`fragments × 1s`); the
    /// payload is never decoded here.
    pub fn extract(snapshot: &[Fragment], mime_type: &str) -> Result<Clip, ExtractError> {
        if snapshot.is_empty() {
            return Err(ExtractError::NoDataYet);
        }

        let total: usize = snapshot.iter().map(|f| f.payload.len()).sum();
        let mut payload = BytesMut::with_capacity(total);
        for fragment in snapshot {
            payload.extend_from_slice(&fragment.payload);
        }

        Ok(Clip {
            id: ClipId::new(),
            payload: payload.freeze(),
            mime_type: mime_type.to_string(),
            duration_seconds: snapshot.len() as u32 * (CHUNK_INTERVAL_MS / 1000) as u32,
            created_at: Utc::now(),
            preview: None,
        })
    }

    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Path of the playable preview file, staging the payload on first use.
    ///
    /// The file lives until `release_preview` or the clip is dropped.
    pub fn preview_path(&mut self) -> std::io::Result<&Path> {
        let file = match self.preview.take() {
            Some(file) => file,
            None => {
                let mut file = tempfile::NamedTempFile::new()?;
                file.write_all(&self.payload)?;
                file.flush()?;
                file
            }
        };
        Ok(self.preview.insert(file).path())
    }

    /// Delete the preview file if one was staged
    pub fn release_preview(&mut self) {
        self.preview = None;
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }
}
