// Publishing flow
//
// Packages a clip, a derived thumbnail, and the user's metadata into one
// multipart submission. Validation runs before any derivation or network
// work, a thumbnail failure is downgraded to a warning, and nothing
// local is discarded until the backend confirms the create.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::api::{ApiError, FilePart, Momento, MomentoApi, NewMomento};
use crate::capture::{ClipId, ClipSession};
use crate::thumbnail::{self, FrameDecoder, ThumbnailOptions};

/// Largest video the backend accepts
pub const MAX_VIDEO_BYTES: u64 = 100 * 1024 * 1024;

/// Largest thumbnail the backend accepts
pub const MAX_THUMBNAIL_BYTES: u64 = 5 * 1024 * 1024;

/// Error type for the publish flow
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The publish form requires a title
    #[error("titulo must not be empty")]
    TituloRequired,

    /// The clip is larger than the backend will take
    #[error("video is {size_bytes} bytes, over the {MAX_VIDEO_BYTES} byte upload limit")]
    VideoTooLarge { size_bytes: u64 },

    #[error("unknown clip id: {0}")]
    UnknownClip(ClipId),

    /// A submission is already outstanding; the caller must wait for it
    #[error("another publish is already in progress")]
    InFlight,

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Metadata entered in the publish dialog
#[derive(Debug, Clone, Default)]
pub struct UploadDraft {
    pub titulo: String,
    pub descricao: String,
    /// Raw comma-separated tag input, parsed on submission
    pub tags: String,
}

impl UploadDraft {
    /// Comma-split, trimmed tag list; empties and duplicates dropped,
    /// first-seen order kept.
    pub fn parsed_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for raw in self.tags.split(',') {
            let tag = raw.trim();
            if tag.is_empty() || tags.iter().any(|t| t == tag) {
                continue;
            }
            tags.push(tag.to_string());
        }
        tags
    }
}

/// Result of a successful publish
#[derive(Debug)]
pub struct PublishOutcome {
    pub momento: Momento,
    /// True when the published clip was the session's last; the capture
    /// flow is finished and the caller can navigate away.
    pub session_finished: bool,
}

/// Drives the publish flow against the backend
pub struct UploadCoordinator {
    api: Arc<dyn MomentoApi>,
    decoder: Arc<dyn FrameDecoder + Send + Sync>,
    thumbnail_options: ThumbnailOptions,
    in_flight: AtomicBool,
}

impl UploadCoordinator {
    pub fn new(api: Arc<dyn MomentoApi>, decoder: Arc<dyn FrameDecoder + Send + Sync>) -> Self {
        Self {
            api,
            decoder,
            thumbnail_options: ThumbnailOptions::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Override the thumbnail derivation knobs (usually from [`crate::Config`])
    pub fn with_thumbnail_options(mut self, options: ThumbnailOptions) -> Self {
        self.thumbnail_options = options;
        self
    }

    /// True while a submission is outstanding; the UI disables its
    /// submit control on this.
    pub fn is_publishing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Publish one clip from the session.
    ///
    /// On failure the clip, the session, and the draft all survive
    /// untouched for a retry. On success the clip's preview is released
    /// and the clip leaves the session.
    pub async fn publish(
        &self,
        session: &mut ClipSession,
        clip_id: ClipId,
        draft: &UploadDraft,
    ) -> Result<PublishOutcome, PublishError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(PublishError::InFlight);
        }
        let result = self.publish_inner(session, clip_id, draft).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn publish_inner(
        &self,
        session: &mut ClipSession,
        clip_id: ClipId,
        draft: &UploadDraft,
    ) -> Result<PublishOutcome, PublishError> {
        // Fail fast: no derivation or network work on an invalid draft
        let titulo = draft.titulo.trim();
        if titulo.is_empty() {
            return Err(PublishError::TituloRequired);
        }

        let clip = session
            .get(clip_id)
            .ok_or(PublishError::UnknownClip(clip_id))?;
        if clip.size_bytes() > MAX_VIDEO_BYTES {
            return Err(PublishError::VideoTooLarge {
                size_bytes: clip.size_bytes(),
            });
        }

        // Derived per attempt; a failure publishes without a thumbnail
        let thumbnail = match thumbnail::derive_thumbnail(
            self.decoder.as_ref(),
            clip,
            self.thumbnail_options,
        ) {
            Ok(artifact) if artifact.data.len() as u64 > MAX_THUMBNAIL_BYTES => {
                log::warn!(
                    "thumbnail is {} bytes, over the upload limit; publishing without one",
                    artifact.data.len()
                );
                None
            }
            Ok(artifact) => Some(FilePart {
                file_name: artifact.file_name,
                mime_type: artifact.mime_type.to_string(),
                data: Bytes::from(artifact.data),
            }),
            Err(e) => {
                log::warn!("thumbnail derivation failed, publishing without one: {e}");
                None
            }
        };

        let descricao = draft.descricao.trim();
        let momento = NewMomento {
            titulo: titulo.to_string(),
            descricao: (!descricao.is_empty()).then(|| descricao.to_string()),
            duracao: clip.duration_seconds(),
            tags: draft.parsed_tags(),
            video: FilePart {
                file_name: format!("momento_{}.webm", clip.id()),
                mime_type: clip.mime_type().to_string(),
                data: clip.payload().clone(),
            },
            thumbnail,
        };

        let created = self.api.create_momento(&momento).await?;
        log::info!("published momento {} ({})", created.id, created.titulo);

        // Only now does local state change: drop the published clip and
        // its preview; the rest of the session stays as it was.
        let _ = session.delete_clip(clip_id);
        Ok(PublishOutcome {
            momento: created,
            session_finished: session.is_empty(),
        })
    }
}
