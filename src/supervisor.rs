//! Outer generation loop.
//!
//! Runs sessions until one is accepted, the attempt ceiling is reached, or an
//! interrupt is requested. Rejected attempts are retained so an interrupted or
//! exhausted run can still hand back whatever the last attempt produced, with
//! the completeness flag cleared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::retry::Clock;
use crate::session::{GenerationResult, StorySession};

/// Bounds for the outer loop. Distinct from the call-level retry policy; the
/// inter-attempt delay is deliberately shorter than the call retry delay
/// because a rejected attempt already cost a full model round trip.
#[derive(Debug, Clone)]
pub struct SupervisorPolicy {
    pub max_attempts: usize,
    pub delay_between_attempts: Duration,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            delay_between_attempts: Duration::from_secs(7),
        }
    }
}

/// Drives repeated sessions until one produces a complete story.
pub struct Supervisor {
    session: StorySession,
    policy: SupervisorPolicy,
    clock: Arc<dyn Clock>,
    interrupt: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(
        session: StorySession,
        policy: SupervisorPolicy,
        clock: Arc<dyn Clock>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session,
            policy,
            clock,
            interrupt,
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Run until a complete story is produced.
    ///
    /// `guidance` feeds the prompt acquirer when `use_prompt_acquirer` is set,
    /// otherwise it is used verbatim as the story prompt. Returns `None` only
    /// when no attempt produced anything retainable; a partial result has
    /// `complete == false`.
    #[instrument(skip_all)]
    pub async fn run(&self, use_prompt_acquirer: bool, guidance: &str) -> Option<GenerationResult> {
        let mut partial: Option<GenerationResult> = None;

        for attempt in 1..=self.policy.max_attempts {
            if self.interrupted() {
                warn!(attempt, "interrupt requested, stopping generation");
                return partial;
            }

            match self.session.run(attempt, use_prompt_acquirer, guidance).await {
                Ok(record) if record.failure.is_none() => {
                    info!(attempt, "story generation complete");
                    return Some(record.into_result(true));
                }
                Ok(record) => {
                    // Keep the newest rejected attempt; a later try reflects
                    // the freshest model behavior.
                    partial = Some(record.into_result(false));
                }
                Err(err) => {
                    warn!(attempt, error = %err, "attempt failed locally");
                }
            }

            if attempt < self.policy.max_attempts && !self.interrupted() {
                self.clock.sleep(self.policy.delay_between_attempts).await;
            }
        }

        warn!(
            attempts = self.policy.max_attempts,
            "attempt ceiling reached without a complete story"
        );
        partial
    }
}
