//! Shared test helpers: a scripted driver and a recording renderer.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use sortie::driver::{ConversationDriver, DriverCallbacks, DriverRequest};
use sortie::error::{Result, SortieError};
use sortie::render::{Notice, RenderItem, Renderer};
use sortie::types::{ApiExchange, ContentBlock, Message, Role, ToolOutput};

/// What the driver does on one call.
pub enum Step {
    /// Append an assistant text reply.
    Reply(String),
    /// Run one tool call to completion, then reply.
    ToolTurn { id: String, name: String, reply: String },
    /// Fail with a driver error.
    Fail(String),
    /// Ask for a tool, fire the stop token and never finish.
    Stall { tool_use_id: String, stop: CancellationToken },
}

/// A driver that plays back queued steps, one per call.
#[derive(Default)]
pub struct ScriptedDriver {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<DriverRequest>>,
}

impl ScriptedDriver {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(text: &str) -> Step {
        Step::Reply(text.to_string())
    }

    pub fn tool_turn(id: &str, reply: &str) -> Step {
        Step::ToolTurn {
            id: id.to_string(),
            name: "computer".to_string(),
            reply: reply.to_string(),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<DriverRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ConversationDriver for ScriptedDriver {
    async fn converse(
        &self,
        request: DriverRequest,
        callbacks: &mut dyn DriverCallbacks,
    ) -> Result<Vec<Message>> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Reply("ok".to_string()));

        let mut messages = request.messages;
        match step {
            Step::Reply(text) => {
                let block = ContentBlock::text(text);
                callbacks.on_output(&block)?;
                messages.push(Message::with_blocks(Role::Assistant, vec![block]));
            }
            Step::ToolTurn { id, name, reply } => {
                let tool_use = ContentBlock::ToolUse {
                    id: id.clone(),
                    name,
                    input: json!({"action": "screenshot"}),
                };
                callbacks.on_output(&tool_use)?;
                callbacks.on_tool_output(
                    &id,
                    ToolOutput {
                        output: Some("captured".to_string()),
                        base64_image: Some("aW1hZ2U=".to_string()),
                        ..ToolOutput::default()
                    },
                )?;
                messages.push(Message::with_blocks(Role::Assistant, vec![tool_use]));
                messages.push(Message::with_blocks(
                    Role::User,
                    vec![ContentBlock::ToolResult {
                        tool_use_id: id,
                        content: json!("captured"),
                        is_error: false,
                    }],
                ));
                let block = ContentBlock::text(reply);
                callbacks.on_output(&block)?;
                messages.push(Message::with_blocks(Role::Assistant, vec![block]));
            }
            Step::Fail(message) => return Err(SortieError::Driver(message)),
            Step::Stall { tool_use_id, stop } => {
                callbacks.on_output(&ContentBlock::ToolUse {
                    id: tool_use_id,
                    name: "computer".to_string(),
                    input: json!({"action": "left_click"}),
                })?;
                stop.cancel();
                std::future::pending::<()>().await;
            }
        }
        Ok(messages)
    }
}

/// Everything a [`RecordingRenderer`] was asked to show.
#[derive(Debug, Clone, PartialEq)]
pub enum Shown {
    Chat { role: Role, text: String },
    Exchange(String),
    Error { title: String, body: String },
    Notice(Notice, String),
    Artifact { file_name: String, bytes: Vec<u8> },
}

#[derive(Default)]
pub struct RecordingRenderer {
    shown: Mutex<Vec<Shown>>,
    /// Fail every tool output render when set.
    pub fail_tool_output: bool,
}

impl RecordingRenderer {
    pub fn failing_tool_output() -> Self {
        Self {
            fail_tool_output: true,
            ..Self::default()
        }
    }

    pub fn shown(&self) -> Vec<Shown> {
        self.shown.lock().unwrap().clone()
    }

    pub fn artifacts(&self) -> Vec<(String, serde_json::Value)> {
        self.shown()
            .into_iter()
            .filter_map(|item| match item {
                Shown::Artifact { file_name, bytes } => {
                    Some((file_name, serde_json::from_slice(&bytes).unwrap()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn error_titles(&self) -> Vec<String> {
        self.shown()
            .into_iter()
            .filter_map(|item| match item {
                Shown::Error { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }

    fn push(&self, item: Shown) {
        self.shown.lock().unwrap().push(item);
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, role: Role, item: RenderItem<'_>) -> Result<()> {
        let text = match item {
            RenderItem::Text(text) => text.to_string(),
            RenderItem::Block(ContentBlock::Text { text }) => text.clone(),
            RenderItem::Block(ContentBlock::ToolUse { name, .. }) => format!("tool_use {name}"),
            RenderItem::Block(ContentBlock::ToolResult { .. }) => {
                return Err(SortieError::Render("raw tool result".into()))
            }
            RenderItem::ToolOutput(output) => {
                if self.fail_tool_output {
                    return Err(SortieError::Render("tool pane closed".into()));
                }
                output
                    .error
                    .clone()
                    .or_else(|| output.output.clone())
                    .unwrap_or_default()
            }
        };
        self.push(Shown::Chat { role, text });
        Ok(())
    }

    fn render_api_exchange(&self, id: &str, _exchange: &ApiExchange) -> Result<()> {
        self.push(Shown::Exchange(id.to_string()));
        Ok(())
    }

    fn render_error(&self, title: &str, body: &str) {
        self.push(Shown::Error {
            title: title.to_string(),
            body: body.to_string(),
        });
    }

    fn notify(&self, level: Notice, message: &str) {
        self.push(Shown::Notice(level, message.to_string()));
    }

    fn deliver_artifact(&self, file_name: &str, encoded: &str) -> Result<()> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|err| SortieError::Render(err.to_string()))?;
        self.push(Shown::Artifact {
            file_name: file_name.to_string(),
            bytes,
        });
        Ok(())
    }
}
