//! One end-to-end generation attempt.
//!
//! A session submits the prompt, consumes the mixed text/image response
//! (streaming first, one batched call as fallback), segments the text, decodes
//! and persists the images, and validates the result against the completeness
//! thresholds. Attempts never share state; every run gets fresh buffers and a
//! fresh working directory.

use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::client::StoryConfig;
use crate::error::Result;
use crate::model::{GenerativeModel, ModelRequest, ResponseChunk};
use crate::prompt::PromptAcquirer;
use crate::retry::Retrier;
use crate::story::{derive_title, extension_for_mime, split_segments, SegmentBuffer};

/// Why an attempt was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("structurally invalid chunk in response stream")]
    MalformedStream,
    #[error("no usable model response after exhausting retries")]
    NoModelResponse,
    #[error("only {count} story segments (need at least {needed})")]
    TooFewSegments { count: usize, needed: usize },
    #[error("only {count} valid images (need at least {needed})")]
    TooFewImages { count: usize, needed: usize },
    #[error("{failures} image failures reached the budget of {budget}")]
    ImageFailuresExceeded { failures: usize, budget: usize },
}

/// A decoded image payload awaiting persistence.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Record of one pass through the session.
///
/// Fields are filled progressively, so a rejected attempt still carries
/// whatever story text and images it managed to produce.
#[derive(Debug)]
pub struct GenerationAttempt {
    pub id: Uuid,
    pub index: usize,
    pub started_at: DateTime<Utc>,
    pub prompt_text: String,
    pub story_text: String,
    pub title: String,
    pub segments: Vec<String>,
    pub image_paths: Vec<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub failure: Option<FailureReason>,
}

impl GenerationAttempt {
    fn new(index: usize, prompt_text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            started_at: Utc::now(),
            prompt_text,
            story_text: String::new(),
            title: String::new(),
            segments: Vec::new(),
            image_paths: Vec::new(),
            work_dir: None,
            failure: None,
        }
    }

    fn reject(mut self, reason: FailureReason) -> Self {
        warn!(attempt = self.index, reason = %reason, "attempt rejected");
        self.failure = Some(reason);
        self
    }

    /// Convert into the caller-facing result record.
    pub fn into_result(self, complete: bool) -> GenerationResult {
        GenerationResult {
            title: self.title,
            story_text: self.story_text,
            segments: self.segments,
            image_paths: self.image_paths,
            work_dir: self.work_dir,
            prompt_text: self.prompt_text,
            complete,
        }
    }
}

/// The accepted output of a generation run, handed verbatim to downstream
/// collaborators (audio, video, metadata). The working directory's lifetime
/// belongs to the holder of this value; nothing cleans it up automatically.
#[derive(Debug)]
pub struct GenerationResult {
    pub title: String,
    pub story_text: String,
    pub segments: Vec<String>,
    pub image_paths: Vec<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub prompt_text: String,
    /// Whether the segment and image thresholds were both met.
    pub complete: bool,
}

/// Everything harvested from one model response, before validation.
struct Harvest {
    story_text: String,
    segments: Vec<String>,
    images: Vec<ImageRecord>,
    decode_failures: usize,
}

enum Gathered {
    Harvest(Harvest),
    /// A structurally invalid chunk was seen; the attempt must be abandoned.
    Malformed,
    /// The retry budget ran out without a usable response.
    Unavailable,
}

/// Drives a single attempt from prompt to validated artifact set.
pub struct StorySession {
    model: Arc<dyn GenerativeModel>,
    prompts: PromptAcquirer,
    retrier: Retrier,
    config: StoryConfig,
}

impl StorySession {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        prompts: PromptAcquirer,
        retrier: Retrier,
        config: StoryConfig,
    ) -> Self {
        Self {
            model,
            prompts,
            retrier,
            config,
        }
    }

    /// Run one attempt. `Ok` carries the attempt record whether it was
    /// accepted or rejected; `Err` means a local failure (I/O) that the
    /// supervisor treats the same as a rejection.
    #[instrument(skip(self, guidance), fields(attempt = index))]
    pub async fn run(
        &self,
        index: usize,
        use_prompt_acquirer: bool,
        guidance: &str,
    ) -> Result<GenerationAttempt> {
        let prompt_text = if use_prompt_acquirer {
            self.prompts.acquire(guidance).await
        } else {
            guidance.to_string()
        };
        debug!(prompt = %prompt_text, "submitting story request");

        let request = ModelRequest::illustrated(&self.config.story_model, &prompt_text)
            .with_safety_settings(self.config.safety_settings.clone());
        let mut attempt = GenerationAttempt::new(index, prompt_text);

        let gathered = match self.consume_stream(&request).await {
            Ok(gathered) => gathered,
            Err(err) => {
                warn!(error = %err, "streaming call failed, falling back to batched call");
                self.batched(&request).await
            }
        };

        let harvest = match gathered {
            Gathered::Harvest(harvest) => harvest,
            Gathered::Malformed => return Ok(attempt.reject(FailureReason::MalformedStream)),
            Gathered::Unavailable => return Ok(attempt.reject(FailureReason::NoModelResponse)),
        };

        attempt.story_text = harvest.story_text;
        let (title, cleaned) = derive_title(&harvest.segments);
        attempt.title = title;
        attempt.segments = cleaned;

        if attempt.segments.len() < self.config.min_segments {
            let count = attempt.segments.len();
            return Ok(attempt.reject(FailureReason::TooFewSegments {
                count,
                needed: self.config.min_segments,
            }));
        }

        // No images at all is handled like a blown failure budget: the model
        // produced a story but nothing to illustrate it with.
        if harvest.images.is_empty() {
            return Ok(attempt.reject(FailureReason::ImageFailuresExceeded {
                failures: self.config.image_failure_budget,
                budget: self.config.image_failure_budget,
            }));
        }

        let mut failures = harvest.decode_failures;
        self.materialize(&mut attempt, &harvest.images, &mut failures)
            .await?;

        if failures >= self.config.image_failure_budget {
            return Ok(attempt.reject(FailureReason::ImageFailuresExceeded {
                failures,
                budget: self.config.image_failure_budget,
            }));
        }
        if attempt.image_paths.len() < self.config.min_images {
            let count = attempt.image_paths.len();
            return Ok(attempt.reject(FailureReason::TooFewImages {
                count,
                needed: self.config.min_images,
            }));
        }

        info!(
            attempt = index,
            segments = attempt.segments.len(),
            images = attempt.image_paths.len(),
            "attempt accepted"
        );
        Ok(attempt)
    }

    /// Consume the streaming response. `Err` signals a transport-level
    /// failure and lets the caller fall back to the batched call.
    async fn consume_stream(&self, request: &ModelRequest) -> Result<Gathered> {
        let mut stream = self.model.stream_content(request).await?;

        let mut buffer = SegmentBuffer::new();
        let mut story_text = String::new();
        let mut images = Vec::new();
        let mut decode_failures = 0usize;

        while let Some(item) = stream.next().await {
            match item? {
                ResponseChunk::Text(text) => {
                    story_text.push_str(&text);
                    buffer.push(&text);
                }
                ResponseChunk::Image { data, mime_type } => {
                    match BASE64.decode(data.as_bytes()) {
                        Ok(bytes) => images.push(ImageRecord {
                            mime_type,
                            data: bytes,
                        }),
                        Err(err) => {
                            warn!(error = %err, "image chunk failed base64 decode");
                            decode_failures += 1;
                        }
                    }
                }
                ResponseChunk::Malformed(detail) => {
                    warn!(detail = %detail, "malformed chunk, abandoning attempt");
                    return Ok(Gathered::Malformed);
                }
            }
        }

        Ok(Gathered::Harvest(Harvest {
            story_text,
            segments: buffer.finish(),
            images,
            decode_failures,
        }))
    }

    /// Single batched call used when streaming fails, wrapped in the retrier.
    /// A response that only describes its images in prose is a soft failure
    /// and gets retried.
    async fn batched(&self, request: &ModelRequest) -> Gathered {
        let response = self
            .retrier
            .run(|| async move {
                let response = self.model.generate_content(request).await?;
                if response.has_image_description_marker() {
                    warn!("model described images in text instead of generating them");
                    return Ok(None);
                }
                Ok(Some(response))
            })
            .await;

        let Some(response) = response else {
            return Gathered::Unavailable;
        };

        let mut images = Vec::new();
        let mut decode_failures = 0usize;
        for chunk in &response.chunks {
            match chunk {
                ResponseChunk::Malformed(detail) => {
                    warn!(detail = %detail, "malformed chunk in batched response");
                    return Gathered::Malformed;
                }
                ResponseChunk::Image { data, mime_type } => {
                    match BASE64.decode(data.as_bytes()) {
                        Ok(bytes) => images.push(ImageRecord {
                            mime_type: mime_type.clone(),
                            data: bytes,
                        }),
                        Err(err) => {
                            warn!(error = %err, "image part failed base64 decode");
                            decode_failures += 1;
                        }
                    }
                }
                ResponseChunk::Text(_) => {}
            }
        }

        let story_text = response.text();
        Gathered::Harvest(Harvest {
            segments: split_segments(&story_text),
            story_text,
            images,
            decode_failures,
        })
    }

    /// Persist images into a fresh working directory, verifying each file
    /// opens as a valid image before counting it.
    async fn materialize(
        &self,
        attempt: &mut GenerationAttempt,
        images: &[ImageRecord],
        failures: &mut usize,
    ) -> Result<()> {
        let work_dir = tempfile::Builder::new()
            .prefix("storyloom-")
            .tempdir()?
            .keep();
        attempt.work_dir = Some(work_dir.clone());

        for (idx, record) in images.iter().enumerate() {
            let ext = extension_for_mime(&record.mime_type);
            let path = work_dir.join(format!("image_{}.{}", idx + 1, ext));
            if let Err(err) = tokio::fs::write(&path, &record.data).await {
                warn!(path = %path.display(), error = %err, "failed to write image");
                *failures += 1;
                continue;
            }
            match image::open(&path) {
                Ok(_) => {
                    debug!(path = %path.display(), "saved and verified image");
                    attempt.image_paths.push(path);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "saved image is not decodable");
                    *failures += 1;
                }
            }
        }
        Ok(())
    }
}
