//! Minimax image and image-to-video generation over HTTP.
//!
//! Image requests either return URLs directly or a `task_id` to poll.
//! Video requests always return a `task_id`; the finished task carries a
//! `file_id` that resolves to a download URL. Every artifact is downloaded
//! and written to the [`ArtifactStore`] before the call returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use serde_json::{json, Value};
use shorts_core::generation::{
    AdapterError, GenerationAdapter, GenerationRequest, PermanentKind, TransientKind,
};
use shorts_core::stage::Stage;

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::config::MinimaxConfig;

/// Longest prompt the image endpoint accepts, in characters.
pub const MAX_IMAGE_PROMPT_CHARS: usize = 1500;

/// Longest prompt the video endpoint accepts, in characters.
pub const MAX_VIDEO_PROMPT_CHARS: usize = 2000;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map a non-success HTTP status to an adapter error.
pub fn classify_status(status: StatusCode, body: &str) -> AdapterError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status.as_u16() {
        408 => AdapterError::transient(TransientKind::Timeout, message),
        429 => AdapterError::transient(TransientKind::RateLimited, message),
        500..=599 => AdapterError::transient(TransientKind::Server, message),
        401 | 403 => AdapterError::permanent(PermanentKind::Unauthorized, message),
        402 => AdapterError::permanent(PermanentKind::QuotaExhausted, message),
        _ => AdapterError::permanent(PermanentKind::InvalidInput, message),
    }
}

/// Map a non-zero `base_resp.status_code` to an adapter error.
pub fn classify_base_resp(code: i64, message: &str) -> AdapterError {
    let message = format!("Minimax status {code}: {message}");
    match code {
        1002 | 1039 => AdapterError::transient(TransientKind::RateLimited, message),
        1000 | 1001 | 1013 => AdapterError::transient(TransientKind::Server, message),
        1004 => AdapterError::permanent(PermanentKind::Unauthorized, message),
        1008 => AdapterError::permanent(PermanentKind::QuotaExhausted, message),
        1026 | 1027 => AdapterError::permanent(PermanentKind::ContentRejected, message),
        _ => AdapterError::permanent(PermanentKind::InvalidInput, message),
    }
}

fn classify_request(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::transient(TransientKind::Timeout, e.to_string())
    } else {
        AdapterError::transient(TransientKind::Network, e.to_string())
    }
}

fn malformed(what: &str) -> AdapterError {
    AdapterError::transient(TransientKind::Server, format!("Malformed response: {what}"))
}

/// Fail if the body carries a non-zero `base_resp.status_code`.
fn check_base_resp(body: &Value) -> Result<(), AdapterError> {
    let Some(base) = body.get("base_resp") else {
        return Ok(());
    };
    let code = base.get("status_code").and_then(Value::as_i64).unwrap_or(0);
    if code == 0 {
        return Ok(());
    }
    let message = base
        .get("status_msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Err(classify_base_resp(code, message))
}

// ---------------------------------------------------------------------------
// Task polling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Finished,
    Failed,
    Processing,
}

impl TaskStatus {
    /// Unknown values count as still processing.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "finished" | "success" | "completed" | "done" => Self::Finished,
            "failed" | "fail" | "error" => Self::Failed,
            _ => Self::Processing,
        }
    }
}

/// Status may sit at the root, under `data`, or as `task_status`.
fn task_status(body: &Value) -> TaskStatus {
    body.get("status")
        .or_else(|| body.pointer("/data/status"))
        .or_else(|| body.get("task_status"))
        .and_then(Value::as_str)
        .map_or(TaskStatus::Processing, TaskStatus::parse)
}

fn first_str<'a>(body: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .find_map(|p| body.pointer(p).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// Where a finished video can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum VideoHandle {
    FileId(String),
    Url(String),
}

fn video_handle(body: &Value) -> Option<VideoHandle> {
    if let Some(id) = body
        .get("file_id")
        .or_else(|| body.pointer("/data/file_id"))
        .or_else(|| body.pointer("/data/video/file_id"))
    {
        // file_id is sometimes numeric.
        let id = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !id.is_empty() {
            return Some(VideoHandle::FileId(id));
        }
    }
    first_str(body, &["/data/video/url", "/data/url"]).map(|u| VideoHandle::Url(u.to_string()))
}

fn image_url(body: &Value) -> Option<String> {
    first_str(body, &["/data/image_urls/0", "/data/image/url", "/data/url"]).map(String::from)
}

fn task_id(body: &Value) -> Option<String> {
    first_str(body, &["/task_id", "/data/task_id"]).map(String::from)
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct MinimaxAdapter {
    client: reqwest::Client,
    config: MinimaxConfig,
    artifacts: Arc<ArtifactStore>,
}

impl MinimaxAdapter {
    pub fn new(config: MinimaxConfig, artifacts: Arc<ArtifactStore>) -> Self {
        Self::with_client(reqwest::Client::new(), config, artifacts)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(
        client: reqwest::Client,
        config: MinimaxConfig,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            client,
            config,
            artifacts,
        }
    }

    async fn generate_image(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        let body = json!({
            "model": self.config.image_model,
            "prompt": truncate(&request.prompt, MAX_IMAGE_PROMPT_CHARS),
            "aspect_ratio": self.config.aspect_ratio,
            "response_format": "url",
            "n": 1,
            "prompt_optimizer": true,
        });
        let response = self.post_json("image_generation", &body).await?;

        let url = match (image_url(&response), task_id(&response)) {
            (Some(url), _) => url,
            (None, Some(task)) => {
                tracing::debug!(task_id = %task, scene_index = request.scene_index, "Image task queued");
                let finished = self
                    .wait_for_task(
                        "query/image_generation",
                        &task,
                        self.config.image_poll_interval,
                        self.config.image_max_polls,
                    )
                    .await?;
                image_url(&finished).ok_or_else(|| malformed("finished image task has no URL"))?
            }
            (None, None) => return Err(malformed("neither image_urls nor task_id")),
        };

        let (bytes, content_type) = self.download(&url).await?;
        let extension = image_extension(content_type.as_deref(), &url);
        self.store(request, extension, &bytes).await
    }

    async fn generate_video(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        let image_ref = request.dependency.as_deref().ok_or_else(|| {
            AdapterError::permanent(PermanentKind::InvalidInput, "video requires an image artifact")
        })?;
        let image = self.artifacts.read(image_ref).await.map_err(|e| {
            AdapterError::permanent(PermanentKind::InvalidInput, e.to_string())
        })?;

        let prompt = format!("{} {}", request.prompt.trim(), self.config.video_prompt);
        let body = json!({
            "model": self.config.video_model,
            "prompt": truncate(&prompt, MAX_VIDEO_PROMPT_CHARS),
            "first_frame_image": data_url(image_ref, &image),
            "prompt_optimizer": true,
        });
        let response = self.post_json("video_generation", &body).await?;
        let task = task_id(&response).ok_or_else(|| malformed("video response has no task_id"))?;
        tracing::debug!(task_id = %task, scene_index = request.scene_index, "Video task queued");

        let finished = self
            .wait_for_task(
                "query/video_generation",
                &task,
                self.config.video_poll_interval,
                self.config.video_max_polls,
            )
            .await?;
        let url = match video_handle(&finished) {
            Some(VideoHandle::Url(url)) => url,
            Some(VideoHandle::FileId(id)) => self.file_url(&id).await?,
            None => return Err(malformed("finished video task has no file")),
        };

        let (bytes, _) = self.download(&url).await?;
        self.store(request, "mp4", &bytes).await
    }

    /// Poll a task until it finishes, fails, or the poll budget runs out.
    ///
    /// Transient poll errors are logged and polling continues.
    async fn wait_for_task(
        &self,
        path: &str,
        task: &str,
        interval: Duration,
        max_polls: u32,
    ) -> Result<Value, AdapterError> {
        for poll in 1..=max_polls {
            tokio::time::sleep(interval).await;
            let body = match self.get_json(path, &[("task_id", task)]).await {
                Ok(body) => body,
                Err(e) if e.is_transient() => {
                    tracing::warn!(task_id = %task, poll, error = %e, "Task status check failed");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match task_status(&body) {
                TaskStatus::Finished => return Ok(body),
                TaskStatus::Failed => {
                    let reason = first_str(&body, &["/message", "/error_msg", "/base_resp/status_msg"])
                        .unwrap_or("unknown error");
                    return Err(AdapterError::permanent(
                        PermanentKind::ContentRejected,
                        format!("task {task} failed: {reason}"),
                    ));
                }
                TaskStatus::Processing => {
                    tracing::trace!(task_id = %task, poll, max_polls, "Task still processing");
                }
            }
        }
        Err(AdapterError::transient(
            TransientKind::Timeout,
            format!("task {task} not finished after {max_polls} polls"),
        ))
    }

    async fn file_url(&self, file_id: &str) -> Result<String, AdapterError> {
        let body = self.get_json(&format!("files/{file_id}"), &[]).await?;
        first_str(
            &body,
            &["/url", "/download_url", "/data/url", "/file/download_url"],
        )
        .map(String::from)
        .ok_or_else(|| malformed("file has no download URL"))
    }

    async fn store(
        &self,
        request: &GenerationRequest,
        extension: &str,
        bytes: &[u8],
    ) -> Result<String, AdapterError> {
        self.artifacts
            .write(
                request.project_id,
                request.stage,
                request.scene_index,
                extension,
                bytes,
            )
            .await
            .map_err(|e: ArtifactError| {
                AdapterError::transient(TransientKind::Server, format!("storing artifact: {e}"))
            })
    }

    // ---- HTTP helpers ----

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, AdapterError> {
        let response = self
            .client
            .post(format!("{}/{path}", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(classify_request)?;
        Self::parse_response(response).await
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, AdapterError> {
        let response = self
            .client
            .get(format!("{}/{path}", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .query(query)
            .send()
            .await
            .map_err(classify_request)?;
        Self::parse_response(response).await
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), AdapterError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_request)?;
        let response = Self::ensure_success(response).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response.bytes().await.map_err(classify_request)?;
        Ok((bytes.to_vec(), content_type))
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(classify_status(status, &body));
        }
        Ok(response)
    }

    async fn parse_response(response: reqwest::Response) -> Result<Value, AdapterError> {
        let response = Self::ensure_success(response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| malformed(&e.to_string()))?;
        check_base_resp(&body)?;
        Ok(body)
    }
}

#[async_trait]
impl GenerationAdapter for MinimaxAdapter {
    async fn submit(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        match request.stage {
            Stage::Image => self.generate_image(request).await,
            Stage::Video => self.generate_video(request).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

fn image_extension(content_type: Option<&str>, url: &str) -> &'static str {
    let from_header = content_type.and_then(|ct| match ct.split(';').next()?.trim() {
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        _ => None,
    });
    from_header.unwrap_or_else(|| {
        let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".png") {
            "png"
        } else if path.ends_with(".webp") {
            "webp"
        } else {
            "jpg"
        }
    })
}

/// `data:` URL for a stored image, with the MIME type taken from its extension.
pub fn data_url(reference: &str, bytes: &[u8]) -> String {
    let mime = match reference.rsplit('.').next() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}
