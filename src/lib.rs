//! Illustrated children's story generation over an unreliable generative API.
//!
//! The crate turns one guidance string into a validated story artifact set: a
//! title, blank-line-delimited story segments, and a directory of verified
//! image files. The model service is treated as persistently flaky, so every
//! layer is built around retry and fallback:
//!
//! - [`retry::Retrier`] wraps individual model calls with
//!   classification-dependent backoff and an attempt ceiling.
//! - [`prompt::PromptAcquirer`] obtains a template-conforming story prompt
//!   from the model, falling back to procedural sampling when it cannot.
//! - [`session::StorySession`] runs one attempt end to end: streaming
//!   consumption with a batched fallback, segmentation, image decoding and
//!   persistence, and completeness validation.
//! - [`supervisor::Supervisor`] repeats sessions until one is accepted,
//!   retaining partial output across interrupts and exhaustion.
//!
//! # Example
//!
//! ```no_run
//! use storyloom::StoryClient;
//!
//! # async fn run() -> storyloom::Result<()> {
//! let client = StoryClient::builder()
//!     .api_key_from_env()?
//!     .build()?;
//!
//! if let Some(story) = client.generate().await {
//!     println!("{} ({} images)", story.title, story.image_paths.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod gemini;
pub mod model;
pub mod prompt;
pub mod retry;
pub mod session;
pub mod story;
pub mod supervisor;

pub use client::{StoryClient, StoryClientBuilder, StoryConfig};
pub use error::{ErrorClass, Result, StoryError};
pub use gemini::GeminiModel;
pub use model::{
    ChunkStream, GenerativeModel, Modality, ModelRequest, ModelResponse, ResponseChunk,
    SafetySetting,
};
pub use prompt::PromptAcquirer;
pub use retry::{Clock, Retrier, RetryPolicy, TokioClock};
pub use session::{FailureReason, GenerationAttempt, GenerationResult, StorySession};
pub use supervisor::{Supervisor, SupervisorPolicy};

/// Commonly used types in one import.
pub mod prelude {
    pub use crate::client::{StoryClient, StoryClientBuilder, StoryConfig};
    pub use crate::error::{Result, StoryError};
    pub use crate::model::{GenerativeModel, ModelRequest, ResponseChunk};
    pub use crate::session::{FailureReason, GenerationResult};
    pub use crate::supervisor::SupervisorPolicy;
}
