//! Generative-model boundary types.
//!
//! The rest of the crate never touches a wire format directly: backends decode
//! their responses into [`ResponseChunk`] variants exactly once, and all
//! downstream consumption is over these tagged values.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Literal marker the model emits when it describes an image in prose instead
/// of returning image data. A response containing it is a soft failure.
pub const IMAGE_DESCRIPTION_MARKER: &str = "**Image Description:**";

/// Output modalities requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modality {
    Text,
    Image,
}

/// Safety threshold configuration sent with each request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

impl SafetySetting {
    pub fn new(category: impl Into<String>, threshold: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            threshold: threshold.into(),
        }
    }
}

/// The permissive thresholds used for creative story content.
pub fn permissive_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .into_iter()
    .map(|category| SafetySetting::new(category, "BLOCK_NONE"))
    .collect()
}

/// A single request to the generative model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
    pub modalities: Vec<Modality>,
    pub safety_settings: Vec<SafetySetting>,
}

impl ModelRequest {
    /// Text-only request.
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            modalities: vec![Modality::Text],
            safety_settings: Vec::new(),
        }
    }

    /// Mixed text + image request.
    pub fn illustrated(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            modalities: vec![Modality::Text, Modality::Image],
            safety_settings: Vec::new(),
        }
    }

    pub fn with_safety_settings(mut self, settings: Vec<SafetySetting>) -> Self {
        self.safety_settings = settings;
        self
    }

    pub fn wants_images(&self) -> bool {
        self.modalities.contains(&Modality::Image)
    }
}

/// One decoded unit of model output.
///
/// `Malformed` is produced at the boundary for structurally invalid wire data;
/// the session treats it as fatal to the current attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseChunk {
    /// A text fragment, in arrival order.
    Text(String),
    /// An inline image payload, still base64-encoded as received.
    Image { data: String, mime_type: String },
    /// A chunk that could not be decoded; carries a short description.
    Malformed(String),
}

/// An aggregate (non-streaming) model response.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub chunks: Vec<ResponseChunk>,
}

impl ModelResponse {
    pub fn new(chunks: Vec<ResponseChunk>) -> Self {
        Self { chunks }
    }

    /// All text fragments concatenated in arrival order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for chunk in &self.chunks {
            if let ResponseChunk::Text(text) = chunk {
                out.push_str(text);
            }
        }
        out
    }

    /// True when any textual part carries the image-description marker.
    pub fn has_image_description_marker(&self) -> bool {
        self.chunks.iter().any(|chunk| {
            matches!(chunk, ResponseChunk::Text(text) if text.contains(IMAGE_DESCRIPTION_MARKER))
        })
    }
}

/// Stream of decoded chunks from an in-flight request.
pub type ChunkStream = BoxStream<'static, Result<ResponseChunk>>;

/// Abstract interface over the generative model service.
///
/// Implementations must expose both an incremental and a batched call for the
/// same request shape; callers fall back from one to the other.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Submit a request and consume the response incrementally.
    async fn stream_content(&self, request: &ModelRequest) -> Result<ChunkStream>;

    /// Submit a request and receive one aggregate response.
    async fn generate_content(&self, request: &ModelRequest) -> Result<ModelResponse>;
}
