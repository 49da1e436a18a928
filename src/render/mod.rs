//! Rendering surface contract, history replay and the error path.

pub mod terminal;

pub use terminal::TerminalRenderer;

use std::error::Error as _;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{Result, SortieError};
use crate::session::SessionState;
use crate::storage::SecretStore;
use crate::types::{ApiExchange, ContentBlock, MessageContent, Role, ToolOutput};

/// Something a renderer can display for a role.
#[derive(Debug, Clone, Copy)]
pub enum RenderItem<'a> {
    Text(&'a str),
    Block(&'a ContentBlock),
    ToolOutput(&'a ToolOutput),
}

/// Severity of a status notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Info,
    Success,
    Warning,
}

/// The user-facing surface.
///
/// `ToolResult` blocks must not be passed to [`render`](Renderer::render)
/// directly: they lack display detail, so callers look up the cached
/// [`ToolOutput`] instead (see [`replay_history`]).
pub trait Renderer: Send + Sync {
    fn render(&self, role: Role, item: RenderItem<'_>) -> Result<()>;
    fn render_api_exchange(&self, id: &str, exchange: &ApiExchange) -> Result<()>;
    fn render_error(&self, title: &str, body: &str);
    fn notify(&self, level: Notice, message: &str);
    /// Hand an exported file to the client for saving. `encoded` is base64.
    fn deliver_artifact(&self, file_name: &str, encoded: &str) -> Result<()>;
}

/// Re-render a whole session: messages first, then logged API exchanges.
pub fn replay_history(session: &SessionState, renderer: &dyn Renderer) -> Result<()> {
    for message in &session.transcript {
        match &message.content {
            MessageContent::Text(text) => renderer.render(message.role, RenderItem::Text(text))?,
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => match session.tool_results.get(tool_use_id) {
                            Some(output) => {
                                renderer.render(Role::Tool, RenderItem::ToolOutput(output))?
                            }
                            None => {
                                tracing::warn!(tool_use_id = %tool_use_id, "no cached output for tool result");
                                let fallback = fallback_output(content, *is_error);
                                renderer.render(Role::Tool, RenderItem::ToolOutput(&fallback))?;
                            }
                        },
                        ContentBlock::Text { .. } | ContentBlock::ToolUse { .. } => {
                            renderer.render(message.role, RenderItem::Block(block))?
                        }
                    }
                }
            }
        }
    }
    for (id, exchange) in session.api_exchanges.iter() {
        renderer.render_api_exchange(id, exchange)?;
    }
    Ok(())
}

fn fallback_output(content: &serde_json::Value, is_error: bool) -> ToolOutput {
    let text = match content {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if is_error {
        ToolOutput::error(text)
    } else {
        ToolOutput {
            output: Some(text),
            ..ToolOutput::default()
        }
    }
}

/// Renders errors and keeps a markdown copy of each one.
#[derive(Clone, Default)]
pub struct ErrorReporter {
    storage: Option<Arc<dyn SecretStore>>,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("storage", &self.storage.as_ref().map(|_| ".."))
            .finish()
    }
}

impl ErrorReporter {
    pub fn new(storage: Option<Arc<dyn SecretStore>>) -> Self {
        Self { storage }
    }

    /// Render `error` and persist it as `error_{timestamp}.md`.
    ///
    /// Persistence failures are logged and otherwise ignored.
    pub fn report(&self, renderer: &dyn Renderer, error: &SortieError) {
        let body = error_body(error);
        tracing::error!(kind = error.kind(), error = %error, "reporting error");
        if let Some(storage) = &self.storage {
            let now = Utc::now();
            let name = format!(
                "error_{}.{:06}.md",
                now.timestamp(),
                now.timestamp_subsec_micros()
            );
            if let Err(err) = storage.save(&name, &body) {
                tracing::warn!(error = %err, name, "failed to persist error report");
            }
        }
        renderer.render_error(error.kind(), &body);
    }
}

/// Markdown body describing an error.
pub fn error_body(error: &SortieError) -> String {
    match error {
        SortieError::RateLimited {
            retry_after_secs,
            message,
        } => {
            let mut body = String::from("You have been rate limited.");
            if let Some(secs) = retry_after_secs {
                body.push_str(&format!(
                    " **Retry after {} (H:MM:SS).**",
                    format_hms(*secs)
                ));
            }
            body.push_str("\n\n");
            body.push_str(message);
            body
        }
        other => {
            let mut body = other.to_string();
            let mut source = std::error::Error::source(other);
            if source.is_some() {
                body.push_str("\n\n**Caused by:**");
            }
            while let Some(cause) = source {
                body.push_str(&format!("\n\n- {cause}"));
                source = cause.source();
            }
            body
        }
    }
}

/// `3725` -> `"1:02:05"`.
pub fn format_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}
