//! In-memory state of one running session.

pub mod healer;

pub use healer::{heal_interruption, unpaired_tool_uses, INTERRUPT_TEXT, INTERRUPT_TOOL_ERROR};

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};

use crate::types::{ApiExchange, ContentBlock, Message, Role, ToolOutput};

/// Display records of tool executions, keyed by `tool_use_id`.
pub type ToolResultCache = HashMap<String, ToolOutput>;

/// Insertion-ordered log of API exchanges keyed by a time-based id.
#[derive(Debug, Clone, Default)]
pub struct ApiExchangeLog {
    entries: Vec<(String, ApiExchange)>,
}

impl ApiExchangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an exchange under a fresh id and return the id.
    pub fn record(&mut self, exchange: ApiExchange) -> String {
        let id = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false);
        self.insert(id.clone(), exchange);
        id
    }

    /// Insert under an explicit id. An existing id keeps its position and
    /// has its value replaced.
    pub fn insert(&mut self, id: String, exchange: ApiExchange) {
        if let Some(slot) = self.entries.iter_mut().find(|(key, _)| *key == id) {
            slot.1 = exchange;
        } else {
            self.entries.push((id, exchange));
        }
    }

    pub fn get(&self, id: &str) -> Option<&ApiExchange> {
        self.entries
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, exchange)| exchange)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ApiExchange)> {
        self.entries.iter().map(|(id, exchange)| (id.as_str(), exchange))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Everything that belongs to one running session.
///
/// Owned by a single controller; mutated only on the controlling task.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub transcript: Vec<Message>,
    pub tool_results: ToolResultCache,
    pub api_exchanges: ApiExchangeLog,
    /// True while a driver call is active, and left true when a call was
    /// abandoned by a user stop.
    pub in_progress: bool,
    /// Identifier of the task currently being worked on.
    pub current_identifier: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn, healing any interrupted tool calls first.
    ///
    /// Returns the number of blocks prepended by the healer.
    pub fn push_user_text(&mut self, text: impl Into<String>) -> usize {
        let mut blocks = heal_interruption(&self.transcript, self.in_progress, &mut self.tool_results);
        let healed = blocks.len();
        if healed > 0 {
            tracing::info!(healed, "annotated interrupted turn before new input");
        }
        blocks.push(ContentBlock::text(text));
        self.transcript.push(Message::with_blocks(Role::User, blocks));
        healed
    }

    /// Whether the last message is a user turn awaiting a response.
    pub fn awaiting_response(&self) -> bool {
        self.transcript
            .last()
            .is_some_and(|message| message.role == Role::User)
    }

    /// Identifier used to tag exports.
    pub fn active_identifier(&self) -> &str {
        self.current_identifier.as_deref().unwrap_or("unknown")
    }

    /// Drop all session data and start fresh.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
