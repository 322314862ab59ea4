//! REST backend for the generative-model boundary.
//!
//! Speaks the Gemini `generateContent` and `streamGenerateContent` endpoints
//! with plain serde DTOs. Wire parts are decoded into [`ResponseChunk`]
//! variants here, once, at the boundary; structurally invalid parts or
//! unparsable stream events become `ResponseChunk::Malformed` rather than
//! transport errors.

use async_stream::try_stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{Result, StoryError};
use crate::model::{
    ChunkStream, GenerativeModel, Modality, ModelRequest, ModelResponse, ResponseChunk,
    SafetySetting,
};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini REST client. Explicitly constructed and passed around; no
/// process-wide configuration.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    http: reqwest::Client,
    api_key: String,
}

impl GeminiModel {
    pub fn new(api_key: impl Into<String>) -> Self {
        debug!("creating Gemini REST client");
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, model: &str, method: &str, sse: bool) -> String {
        if sse {
            format!("{API_BASE}/{model}:{method}?alt=sse")
        } else {
            format!("{API_BASE}/{model}:{method}")
        }
    }

    async fn post(&self, url: &str, request: &ModelRequest) -> Result<reqwest::Response> {
        let body = WireRequest::from(request);
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "model API returned an error");
            return Err(StoryError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl GenerativeModel for GeminiModel {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn stream_content(&self, request: &ModelRequest) -> Result<ChunkStream> {
        let url = self.url(&request.model, "streamGenerateContent", true);
        let response = self.post(&url, request).await?;
        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(piece) = bytes.next().await {
                let piece = piece?;
                buffer.extend_from_slice(&piece);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    for chunk in parse_sse_line(line.trim()) {
                        yield chunk;
                    }
                }
            }
            let trailing = String::from_utf8_lossy(&buffer).trim().to_string();
            for chunk in parse_sse_line(&trailing) {
                yield chunk;
            }
        };
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate_content(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let url = self.url(&request.model, "generateContent", false);
        let response = self.post(&url, request).await?;
        let wire: WireResponse = response.json().await?;

        if let Some(reason) = wire.block_reason() {
            return Err(StoryError::Blocked(reason.to_string()));
        }
        Ok(ModelResponse::new(wire.into_chunks()))
    }
}

/// Decode one SSE line into chunks. Non-data lines yield nothing; an
/// unparsable payload yields a single `Malformed` chunk.
fn parse_sse_line(line: &str) -> Vec<ResponseChunk> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Vec::new();
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Vec::new();
    }
    match serde_json::from_str::<WireResponse>(payload) {
        Ok(event) => event.into_chunks(),
        Err(err) => {
            warn!(error = %err, "unparsable stream event");
            vec![ResponseChunk::Malformed(format!(
                "unparsable stream event: {err}"
            ))]
        }
    }
}

// Wire DTOs for the v1beta REST surface.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<WireSafetySetting>,
}

impl From<&ModelRequest> for WireRequest {
    fn from(request: &ModelRequest) -> Self {
        let modalities: Vec<String> = request
            .modalities
            .iter()
            .map(|modality| match modality {
                Modality::Text => "TEXT".to_string(),
                Modality::Image => "IMAGE".to_string(),
            })
            .collect();
        // Text-only requests omit the config; the API default already is text.
        let generation_config = request.wants_images().then_some(WireGenerationConfig {
            response_modalities: Some(modalities),
        });
        Self {
            contents: vec![WireContent {
                role: Some("user".to_string()),
                parts: vec![WirePart {
                    text: Some(request.prompt.clone()),
                    inline_data: None,
                }],
            }],
            generation_config,
            safety_settings: request.safety_settings.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSafetySetting {
    category: String,
    threshold: String,
}

impl From<&SafetySetting> for WireSafetySetting {
    fn from(setting: &SafetySetting) -> Self {
        Self {
            category: setting.category.clone(),
            threshold: setting.threshold.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireBlob>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    prompt_feedback: Option<WirePromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl WireResponse {
    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
    }

    fn into_chunks(self) -> Vec<ResponseChunk> {
        self.candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .map(decode_part)
            .collect()
    }
}

/// Decode one wire part into its tagged variant.
fn decode_part(part: WirePart) -> ResponseChunk {
    if let Some(text) = part.text {
        return ResponseChunk::Text(text);
    }
    if let Some(blob) = part.inline_data {
        if blob.mime_type.is_empty() || blob.data.is_empty() {
            return ResponseChunk::Malformed("inline data missing mime type or payload".to_string());
        }
        return ResponseChunk::Image {
            data: blob.data,
            mime_type: blob.mime_type,
        };
    }
    ResponseChunk::Malformed("part with neither text nor inline data".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_part_decodes_to_text_chunk() {
        let part = WirePart {
            text: Some("hello".to_string()),
            inline_data: None,
        };
        assert_eq!(decode_part(part), ResponseChunk::Text("hello".to_string()));
    }

    #[test]
    fn inline_data_decodes_to_image_chunk() {
        let part = WirePart {
            text: None,
            inline_data: Some(WireBlob {
                mime_type: "image/jpeg".to_string(),
                data: "aGVsbG8=".to_string(),
            }),
        };
        assert_eq!(
            decode_part(part),
            ResponseChunk::Image {
                data: "aGVsbG8=".to_string(),
                mime_type: "image/jpeg".to_string(),
            }
        );
    }

    #[test]
    fn empty_part_decodes_to_malformed_chunk() {
        let part = WirePart {
            text: None,
            inline_data: None,
        };
        assert!(matches!(decode_part(part), ResponseChunk::Malformed(_)));
    }

    #[test]
    fn sse_data_line_yields_chunks() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"Once"},{"inlineData":{"mimeType":"image/png","data":"QUJD"}}]}}]}"#;
        let chunks = parse_sse_line(line);
        assert_eq!(
            chunks,
            vec![
                ResponseChunk::Text("Once".to_string()),
                ResponseChunk::Image {
                    data: "QUJD".to_string(),
                    mime_type: "image/png".to_string(),
                },
            ]
        );
    }

    #[test]
    fn non_data_lines_are_ignored() {
        assert!(parse_sse_line("").is_empty());
        assert!(parse_sse_line(": keepalive").is_empty());
        assert!(parse_sse_line("event: ping").is_empty());
    }

    #[test]
    fn garbage_payload_becomes_malformed_chunk() {
        let chunks = parse_sse_line("data: {not json");
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], ResponseChunk::Malformed(_)));
    }

    #[test]
    fn request_serializes_with_modalities_and_safety() {
        let request = ModelRequest::illustrated("story-model", "a prompt")
            .with_safety_settings(crate::model::permissive_safety_settings());
        let wire = WireRequest::from(&request);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["TEXT", "IMAGE"])
        );
        assert_eq!(json["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "a prompt");
    }

    #[test]
    fn text_request_omits_generation_config() {
        let wire = WireRequest::from(&ModelRequest::text("prompt-model", "hi"));
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("generationConfig").is_none());
    }
}
