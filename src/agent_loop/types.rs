//! Core cycle types for the agent loop.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique cycle identifier, attached to log spans.
pub type CycleId = Uuid;

/// How one pass of the loop ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Nothing to answer; the driver was not called.
    Idle,
    Completed,
    /// The driver, a callback, or a protocol check failed. The error was
    /// already reported.
    Failed,
    /// Abandoned by a user stop. The in-progress flag is left set.
    Interrupted,
}

impl CycleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
