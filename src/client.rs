//! Client configuration and assembly.
//!
//! [`StoryClientBuilder`] wires the model backend, retry policies, clock and
//! interrupt flag into a [`StoryClient`]. Configuration is per-client; there
//! is no process-wide state.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::error::{Result, StoryError};
use crate::gemini::GeminiModel;
use crate::model::{permissive_safety_settings, GenerativeModel, SafetySetting};
use crate::prompt::{PromptAcquirer, DEFAULT_GUIDANCE};
use crate::retry::{Clock, Retrier, RetryPolicy, TokioClock};
use crate::session::{GenerationResult, StorySession};
use crate::supervisor::{Supervisor, SupervisorPolicy};

/// Environment variable holding one API key or a comma-separated pool.
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

const DEFAULT_STORY_MODEL: &str = "gemini-2.0-flash-exp-image-generation";
const DEFAULT_PROMPT_MODEL: &str = "gemini-2.0-flash-thinking-exp-01-21";

/// Tunables for story generation and validation.
#[derive(Debug, Clone)]
pub struct StoryConfig {
    /// Multi-modal model used for the story itself.
    pub story_model: String,
    /// Text model used for prompt acquisition.
    pub prompt_model: String,
    /// Minimum number of story segments for a complete result.
    pub min_segments: usize,
    /// Minimum number of valid images for a complete result.
    pub min_images: usize,
    /// Image failures tolerated before an attempt is rejected.
    pub image_failure_budget: usize,
    pub safety_settings: Vec<SafetySetting>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            story_model: DEFAULT_STORY_MODEL.to_string(),
            prompt_model: DEFAULT_PROMPT_MODEL.to_string(),
            min_segments: 6,
            min_images: 6,
            image_failure_budget: 3,
            safety_settings: permissive_safety_settings(),
        }
    }
}

/// Split a raw key-pool string into individual keys.
fn keys_from(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builder for [`StoryClient`].
#[derive(Default)]
pub struct StoryClientBuilder {
    api_key: Option<String>,
    model: Option<Arc<dyn GenerativeModel>>,
    config: StoryConfig,
    retry_policy: RetryPolicy,
    supervisor_policy: SupervisorPolicy,
    clock: Option<Arc<dyn Clock>>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl StoryClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit API key with the default Gemini backend.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Pick a key at random from the `GEMINI_API_KEY` pool.
    pub fn api_key_from_env(mut self) -> Result<Self> {
        let raw = std::env::var(API_KEY_VAR)
            .map_err(|_| StoryError::Config(format!("{API_KEY_VAR} is not set")))?;
        let keys = keys_from(&raw);
        let key = keys
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| StoryError::Config(format!("{API_KEY_VAR} contains no keys")))?;
        debug!(pool_size = keys.len(), "selected API key from pool");
        self.api_key = Some(key.clone());
        Ok(self)
    }

    /// Substitute the model backend, bypassing the API key entirely.
    pub fn model(mut self, model: Arc<dyn GenerativeModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn config(mut self, config: StoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn supervisor_policy(mut self, policy: SupervisorPolicy) -> Self {
        self.supervisor_policy = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share an interrupt flag with the caller; raising it stops generation
    /// after the current attempt.
    pub fn interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn build(self) -> Result<StoryClient> {
        let model = match (self.model, self.api_key) {
            (Some(model), _) => model,
            (None, Some(key)) => Arc::new(GeminiModel::new(key)) as Arc<dyn GenerativeModel>,
            (None, None) => {
                return Err(StoryError::Config(
                    "an API key or a model backend is required".to_string(),
                ))
            }
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock));
        let interrupt = self.interrupt.unwrap_or_default();

        let retrier = Retrier::new(self.retry_policy, clock.clone());
        let prompts = PromptAcquirer::new(
            model.clone(),
            self.config.prompt_model.clone(),
            retrier.clone(),
        );
        let session = StorySession::new(model, prompts, retrier, self.config);
        let supervisor = Supervisor::new(
            session,
            self.supervisor_policy,
            clock,
            interrupt.clone(),
        );

        info!("story client assembled");
        Ok(StoryClient {
            supervisor,
            interrupt,
        })
    }
}

/// High-level entry point for story generation.
pub struct StoryClient {
    supervisor: Supervisor,
    interrupt: Arc<AtomicBool>,
}

impl StoryClient {
    pub fn builder() -> StoryClientBuilder {
        StoryClientBuilder::new()
    }

    /// Flag shared with the supervisor; raise it to stop after the current
    /// attempt while keeping any partial result.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Generate a story from a model-acquired prompt with default guidance.
    pub async fn generate(&self) -> Option<GenerationResult> {
        self.supervisor.run(true, DEFAULT_GUIDANCE).await
    }

    /// Generate a story from a model-acquired prompt steered by `guidance`.
    pub async fn generate_with_guidance(&self, guidance: &str) -> Option<GenerationResult> {
        self.supervisor.run(true, guidance).await
    }

    /// Generate a story from a caller-supplied prompt, skipping acquisition.
    pub async fn generate_from_prompt(&self, prompt: &str) -> Option<GenerationResult> {
        self.supervisor.run(false, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_completeness_thresholds() {
        let config = StoryConfig::default();
        assert_eq!(config.min_segments, 6);
        assert_eq!(config.min_images, 6);
        assert_eq!(config.image_failure_budget, 3);
        assert_eq!(config.safety_settings.len(), 4);
    }

    #[test]
    fn key_pool_splits_and_trims() {
        assert_eq!(
            keys_from("alpha, beta ,,gamma"),
            vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()]
        );
        assert!(keys_from("  ,, ").is_empty());
    }

    #[test]
    fn build_without_key_or_model_is_a_config_error() {
        let err = StoryClientBuilder::new().build().err();
        assert!(matches!(err, Some(StoryError::Config(_))));
    }

    #[test]
    fn build_with_api_key_succeeds() {
        assert!(StoryClientBuilder::new().api_key("test-key").build().is_ok());
    }
}
