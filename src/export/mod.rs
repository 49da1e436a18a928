//! Single-fire export of a finished conversation.
//!
//! A [`LogFinalizer`] turns the transcript into a JSON artifact at most once
//! per cycle, hands it to the renderer, and then decides whether the
//! transcript survives into the next cycle.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::checkpoint::to_json_indented;
use crate::error::Result;
use crate::render::{Notice, Renderer};
use crate::types::{Message, Role};

/// Identifiers with this prefix keep their context across cycles by default.
pub const DEFAULT_PRESERVE_PREFIX: &str = "scenchg";

/// A serialised conversation waiting to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub identifier: String,
    pub timestamp: NaiveDate,
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    timestamp: String,
    identifier: &'a str,
    messages: Vec<Message>,
}

/// Decides whether the transcript is kept after a task finishes.
pub trait ResetPolicy: Send + Sync {
    /// `true` keeps the transcript for the next task.
    fn preserve_context(&self, identifier: &str) -> bool;
}

impl<F> ResetPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn preserve_context(&self, identifier: &str) -> bool {
        self(identifier)
    }
}

/// Keeps context for identifiers starting with a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRetention {
    prefix: String,
}

impl PrefixRetention {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for PrefixRetention {
    fn default() -> Self {
        Self::new(DEFAULT_PRESERVE_PREFIX)
    }
}

impl ResetPolicy for PrefixRetention {
    fn preserve_context(&self, identifier: &str) -> bool {
        !self.prefix.is_empty() && identifier.starts_with(&self.prefix)
    }
}

/// What [`LogFinalizer::finish_cycle`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinishReport {
    pub exported: bool,
    pub delivered: bool,
    pub reset: bool,
}

/// Export state for one session.
pub struct LogFinalizer {
    log_saved: bool,
    pending: Option<ExportArtifact>,
    download_ready: bool,
    policy: Box<dyn ResetPolicy>,
}

impl std::fmt::Debug for LogFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFinalizer")
            .field("log_saved", &self.log_saved)
            .field("pending", &self.pending.as_ref().map(|a| &a.file_name))
            .field("download_ready", &self.download_ready)
            .finish_non_exhaustive()
    }
}

impl Default for LogFinalizer {
    fn default() -> Self {
        Self::new(PrefixRetention::default())
    }
}

impl LogFinalizer {
    pub fn new(policy: impl ResetPolicy + 'static) -> Self {
        Self {
            log_saved: false,
            pending: None,
            download_ready: false,
            policy: Box::new(policy),
        }
    }

    /// Build the export artifact for `transcript`.
    ///
    /// Returns `Ok(false)` without doing anything when the transcript is
    /// empty or an export already happened in this cycle.
    pub fn finalize(&mut self, transcript: &[Message], identifier: &str, date: NaiveDate) -> Result<bool> {
        if transcript.is_empty() || self.log_saved {
            return Ok(false);
        }
        self.log_saved = true;
        self.download_ready = false;

        let timestamp = date.format("%Y-%m-%d").to_string();
        let document = ExportDocument {
            timestamp: timestamp.clone(),
            identifier,
            messages: reconcile_roles(transcript),
        };
        let bytes = to_json_indented(&document)?;
        let file_name = format!("chat_log_{timestamp}_{}.json", file_safe(identifier));
        tracing::info!(identifier, file_name = %file_name, "conversation log finalized");
        self.pending = Some(ExportArtifact {
            file_name,
            bytes,
            identifier: identifier.to_string(),
            timestamp: date,
        });
        Ok(true)
    }

    /// Hand the pending artifact to the renderer.
    ///
    /// Returns whether the renderer accepted it.
    pub fn deliver(&mut self, renderer: &dyn Renderer) -> bool {
        let Some(artifact) = self.pending.take() else {
            tracing::warn!("no conversation log to deliver");
            return false;
        };
        let encoded = STANDARD.encode(&artifact.bytes);
        match renderer.deliver_artifact(&artifact.file_name, &encoded) {
            Ok(()) => {
                self.download_ready = true;
                renderer.notify(Notice::Success, &format!("Saved {}", artifact.file_name));
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, file_name = %artifact.file_name, "failed to deliver conversation log");
                false
            }
        }
    }

    /// Export, deliver and apply the reset policy, then re-arm the guard.
    pub fn finish_cycle(
        &mut self,
        transcript: &mut Vec<Message>,
        identifier: &str,
        renderer: &dyn Renderer,
    ) -> FinishReport {
        let mut report = FinishReport::default();
        match self.finalize(transcript, identifier, Local::now().date_naive()) {
            Ok(exported) => report.exported = exported,
            Err(err) => tracing::warn!(error = %err, identifier, "failed to build conversation log"),
        }
        if report.exported {
            report.delivered = self.deliver(renderer);
            if !report.delivered {
                tracing::warn!(identifier, "keeping transcript until its log is delivered");
            } else if self.policy.preserve_context(identifier) {
                tracing::debug!(identifier, "keeping transcript for the next task");
            } else {
                transcript.clear();
                report.reset = true;
            }
        }
        self.log_saved = false;
        report
    }

    pub fn pending(&self) -> Option<&ExportArtifact> {
        self.pending.as_ref()
    }

    pub fn log_saved(&self) -> bool {
        self.log_saved
    }

    /// Whether the last artifact reached the renderer.
    pub fn download_ready(&self) -> bool {
        self.download_ready
    }

    pub fn preserves(&self, identifier: &str) -> bool {
        self.policy.preserve_context(identifier)
    }
}

/// User turns that carry tool results are exported as assistant turns.
fn reconcile_roles(transcript: &[Message]) -> Vec<Message> {
    transcript
        .iter()
        .map(|message| {
            let mut message = message.clone();
            if message.role == Role::User && message.has_tool_result() {
                message.role = Role::Assistant;
            }
            message
        })
        .collect()
}

fn file_safe(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}
