//! Work items drawn from the instruction source.

use serde::{Deserialize, Serialize};

/// One unit of work: an identifier plus the task text sent to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instruction {
    pub identifier: String,
    #[serde(rename = "task")]
    pub text: String,
}

impl Instruction {
    pub fn new(identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            text: text.into(),
        }
    }
}
