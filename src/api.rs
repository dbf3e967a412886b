// HTTP client for the Lance Certo backend
//
// Cookie-based session credentials with a CSRF token on state-changing
// requests. The engine's only write path is creating a momento; the
// token bootstrap and the single refresh-and-retry on 403 mirror the
// web client's interceptor. Anything beyond that one retry is out of
// scope.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::multipart;
use reqwest::StatusCode;
use serde::Deserialize;

/// Header Django checks state-changing requests for
const CSRF_HEADER: &str = "X-CSRFToken";

/// Timeout generous enough for a 100 MiB multipart upload
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Error type for backend calls
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend rejected the request ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("failed to encode request: {0}")]
    Encode(String),
}

/// A file part of the momento multipart submission
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Everything needed to create a momento
#[derive(Debug, Clone)]
pub struct NewMomento {
    pub titulo: String,
    pub descricao: Option<String>,
    /// Duration in whole seconds
    pub duracao: u32,
    pub tags: Vec<String>,
    pub video: FilePart,
    pub thumbnail: Option<FilePart>,
}

/// Tag as returned by the backend
#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub nome: String,
    pub slug: String,
}

/// Momento resource as returned by the backend
#[derive(Debug, Clone, Deserialize)]
pub struct Momento {
    pub id: u64,
    pub titulo: String,
    #[serde(default)]
    pub descricao: String,
    pub duracao: u32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct CsrfResponse {
    #[serde(rename = "csrfToken")]
    csrf_token: String,
}

/// Backend surface the upload coordinator depends on
#[async_trait]
pub trait MomentoApi: Send + Sync {
    async fn create_momento(&self, momento: &NewMomento) -> Result<Momento, ApiError>;
}

/// Client for the Lance Certo REST API
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    csrf_token: Mutex<Option<String>>,
}

impl ApiClient {
    /// Create a client targeting the given base URL (e.g.
    /// `http://localhost:8000/api`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            csrf_token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a fresh CSRF token and cache it. The cookie jar picks up
    /// the matching `csrftoken` cookie as a side effect.
    async fn refresh_csrf(&self) -> Result<String, ApiError> {
        let url = format!("{}/auth/csrf/", self.base_url);
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Rejected { status, body });
        }

        let body: CsrfResponse = response.json().await?;
        *self.csrf_token.lock() = Some(body.csrf_token.clone());
        Ok(body.csrf_token)
    }

    /// Cached CSRF token, fetching one on first use
    async fn csrf_token(&self) -> Result<String, ApiError> {
        let cached = self.csrf_token.lock().clone();
        match cached {
            Some(token) => Ok(token),
            None => self.refresh_csrf().await,
        }
    }

    /// Fetch and cache a CSRF token ahead of the first create, so the
    /// publish path does not pay the extra round trip. Optional: the
    /// token is fetched lazily anyway.
    pub async fn ensure_csrf(&self) -> Result<(), ApiError> {
        self.csrf_token().await.map(|_| ())
    }

    /// Build the multipart form for one create attempt. Rebuilt per
    /// attempt because a form is consumed on send.
    fn momento_form(momento: &NewMomento) -> Result<multipart::Form, ApiError> {
        let tags = serde_json::to_string(&momento.tags)
            .map_err(|e| ApiError::Encode(e.to_string()))?;

        let mut form = multipart::Form::new()
            .text("titulo", momento.titulo.clone())
            .text("duracao", momento.duracao.to_string())
            .text("tags", tags);

        if let Some(descricao) = &momento.descricao {
            form = form.text("descricao", descricao.clone());
        }

        let video = multipart::Part::bytes(momento.video.data.to_vec())
            .file_name(momento.video.file_name.clone())
            .mime_str(&momento.video.mime_type)?;
        form = form.part("video", video);

        if let Some(thumbnail) = &momento.thumbnail {
            let part = multipart::Part::bytes(thumbnail.data.to_vec())
                .file_name(thumbnail.file_name.clone())
                .mime_str(&thumbnail.mime_type)?;
            form = form.part("thumbnail", part);
        }

        Ok(form)
    }
}

#[async_trait]
impl MomentoApi for ApiClient {
    async fn create_momento(&self, momento: &NewMomento) -> Result<Momento, ApiError> {
        let url = format!("{}/momentos/", self.base_url);
        let mut token = self.csrf_token().await?;
        let mut retried = false;

        loop {
            let form = Self::momento_form(momento)?;
            let response = self
                .http
                .post(&url)
                .header(CSRF_HEADER, &token)
                .multipart(form)
                .send()
                .await?;

            // A stale token comes back as 403; refresh once and resend.
            if response.status() == StatusCode::FORBIDDEN && !retried {
                log::debug!("momento create rejected with 403, refreshing CSRF token");
                retried = true;
                token = self.refresh_csrf().await?;
                continue;
            }

            if response.status().is_success() {
                return response.json().await.map_err(ApiError::from);
            }

            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Rejected { status, body });
        }
    }
}
