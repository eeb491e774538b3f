//! Rendered artifacts and the explicit retry state machine shared by the
//! generation loops.

use serde::{Deserialize, Serialize};

/// How the final markup of a unit came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSource {
    Generated,
    RepairedByParser,
    RepairedByVision,
    Fallback,
}

impl UnitSource {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitSource::Generated => "generated",
            UnitSource::RepairedByParser => "repaired_by_parser",
            UnitSource::RepairedByVision => "repaired_by_vision",
            UnitSource::Fallback => "fallback",
        }
    }
}

/// One completed slide. Persisted incrementally (one upsert per unit) so a
/// partially finished run survives interruption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedUnit {
    pub position: u32,
    pub markup: String,
    pub source: UnitSource,
}

/// Bounded retry driver. Loops record each failure through [`Self::record`]
/// and consult [`Self::exhausted`] for the exit condition, keeping retry
/// control independent of the error-signaling mechanism.
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    attempt: u32,
    max_attempts: u32,
    last_error: Option<String>,
}

impl GenerationAttempt {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    /// Current attempt number, 1-based once the loop has started.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Begin the next attempt. Returns `false` when the budget is spent.
    pub fn begin(&mut self) -> bool {
        if self.attempt >= self.max_attempts {
            return false;
        }
        self.attempt += 1;
        true
    }

    pub fn record(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Sampling temperature for the current attempt: each retry cools the
    /// model down to push it towards literal, complete output.
    pub fn temperature(&self, base: f32) -> f32 {
        let step = self.attempt.saturating_sub(1) as f32;
        (base - step * 0.15).max(0.0)
    }
}
