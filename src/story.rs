//! Story text handling: segmentation, title derivation and image file naming.

use std::sync::LazyLock;

use regex::Regex;

/// Title used when a story has no parsable first line.
pub const DEFAULT_TITLE: &str = "Generated Story";

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("blank-line pattern is valid"));

/// Incremental segment accumulator for the streaming path.
///
/// Text arrives in arbitrary fragments; a blank-line boundary closes the
/// current segment and opens a new one. Segments that trim to nothing are
/// discarded.
#[derive(Debug, Default)]
pub struct SegmentBuffer {
    pending: String,
    segments: Vec<String>,
}

impl SegmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text fragment, closing any segments it completes.
    pub fn push(&mut self, text: &str) {
        self.pending.push_str(text);
        loop {
            let (start, end) = match BLANK_LINE.find(&self.pending) {
                Some(found) => (found.start(), found.end()),
                None => break,
            };
            let segment = self.pending[..start].to_string();
            self.pending = self.pending[end..].to_string();
            if !segment.trim().is_empty() {
                self.segments.push(segment);
            }
        }
    }

    /// Close the trailing segment and return everything collected.
    pub fn finish(mut self) -> Vec<String> {
        if !self.pending.trim().is_empty() {
            self.segments.push(self.pending);
        }
        self.segments
    }
}

/// Split a complete text into segments on blank-line boundaries.
///
/// Used by the batched-response path; equivalent to pushing the whole text
/// through a [`SegmentBuffer`].
pub fn split_segments(text: &str) -> Vec<String> {
    BLANK_LINE
        .split(text)
        .filter(|segment| !segment.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Derive the story title and the cleaned segment list.
///
/// The title is the first line of segment 0. That line is stripped from the
/// segment body only when the segment has more than one line; a single-line
/// first segment doubles as both title and body. All segments are trimmed and
/// empties dropped.
pub fn derive_title(segments: &[String]) -> (String, Vec<String>) {
    let Some(first) = segments.first() else {
        return (DEFAULT_TITLE.to_string(), Vec::new());
    };

    let mut title = first
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    if title.is_empty() {
        title = DEFAULT_TITLE.to_string();
    }

    let mut cleaned = Vec::with_capacity(segments.len());
    let lines: Vec<&str> = first.lines().collect();
    let body = if lines.len() > 1 {
        lines[1..].join("\n").trim().to_string()
    } else {
        first.trim().to_string()
    };
    if !body.is_empty() {
        cleaned.push(body);
    }
    for segment in &segments[1..] {
        let trimmed = segment.trim();
        if !trimmed.is_empty() {
            cleaned.push(trimmed.to_string());
        }
    }

    (title, cleaned)
}

/// Map a declared MIME type to the file extension used for persisted images.
///
/// `image/jpeg` is normalized to `jpg`; other image types use their subtype.
pub fn extension_for_mime(mime: &str) -> String {
    if mime == "image/jpeg" {
        return "jpg".to_string();
    }
    match mime.rsplit('/').next().filter(|ext| !ext.is_empty()) {
        Some(ext) => ext.to_string(),
        None => mime_guess::get_mime_extensions_str(mime)
            .and_then(|exts| exts.first())
            .map(|ext| ext.to_string())
            .unwrap_or_else(|| "bin".to_string()),
    }
}
