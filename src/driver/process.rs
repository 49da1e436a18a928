//! Conversation driver backed by an external program speaking JSON lines.
//!
//! The request is written to the child's stdin as one JSON document and
//! stdin is closed. The child reports progress on stdout, one JSON event per
//! line, and must finish with a `transcript` event. Credentials travel in the
//! `ANTHROPIC_API_KEY` environment variable, never on stdin.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::{ConversationDriver, DriverCallbacks, DriverRequest};
use crate::error::{Result, SortieError};
use crate::types::{ApiExchange, ContentBlock, Message, ToolOutput};

/// One line of driver output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverEvent {
    Output {
        block: ContentBlock,
    },
    ToolOutput {
        tool_use_id: String,
        result: ToolOutput,
    },
    ApiExchange {
        exchange: ApiExchange,
    },
    Transcript {
        messages: Vec<Message>,
    },
    Error {
        message: String,
        #[serde(default)]
        rate_limited: bool,
        #[serde(default)]
        retry_after_secs: Option<u64>,
    },
}

/// Runs a configured command once per driver call.
#[derive(Debug, Clone)]
pub struct ProcessDriver {
    program: String,
    args: Vec<String>,
}

impl ProcessDriver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a whitespace-separated command line.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            SortieError::Configuration("driver command is empty".to_string())
        })?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl ConversationDriver for ProcessDriver {
    async fn converse(
        &self,
        request: DriverRequest,
        callbacks: &mut dyn DriverCallbacks,
    ) -> Result<Vec<Message>> {
        let payload = serde_json::to_vec(&request)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(key) = &request.api_key {
            command.env("ANTHROPIC_API_KEY", key);
        }

        let mut child = command.spawn().map_err(|err| {
            SortieError::Driver(format!("failed to start {}: {err}", self.program))
        })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SortieError::Driver("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SortieError::Driver("driver stdout unavailable".into()))?;

        // Feed stdin concurrently so a chatty child cannot deadlock on a full pipe.
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut transcript = None;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event: DriverEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, line, "ignoring unparseable driver event");
                    continue;
                }
            };
            match event {
                DriverEvent::Output { block } => callbacks.on_output(&block)?,
                DriverEvent::ToolOutput {
                    tool_use_id,
                    result,
                } => callbacks.on_tool_output(&tool_use_id, result)?,
                DriverEvent::ApiExchange { exchange } => callbacks.on_api_exchange(exchange)?,
                DriverEvent::Transcript { messages } => transcript = Some(messages),
                DriverEvent::Error {
                    message,
                    rate_limited,
                    retry_after_secs,
                } => {
                    return Err(if rate_limited || retry_after_secs.is_some() {
                        SortieError::RateLimited {
                            retry_after_secs,
                            message,
                        }
                    } else {
                        SortieError::Driver(message)
                    });
                }
            }
        }

        let status = child.wait().await?;
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!("driver closed stdin before reading the whole request");
            }
            Ok(Err(err)) => tracing::warn!(error = %err, "writing driver request failed"),
            Err(err) => tracing::warn!(error = %err, "driver stdin writer task failed"),
        }

        match transcript {
            Some(messages) => {
                if !status.success() {
                    tracing::warn!(%status, "driver returned a transcript but exited unsuccessfully");
                }
                Ok(messages)
            }
            None => Err(SortieError::Driver(format!(
                "driver exited ({status}) without returning a transcript"
            ))),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::ApiProvider;
    use crate::types::Role;

    #[derive(Default)]
    struct Recorder {
        outputs: Vec<ContentBlock>,
        tool_outputs: Vec<(String, ToolOutput)>,
        exchanges: usize,
    }

    impl DriverCallbacks for Recorder {
        fn on_output(&mut self, block: &ContentBlock) -> Result<()> {
            self.outputs.push(block.clone());
            Ok(())
        }

        fn on_tool_output(&mut self, tool_use_id: &str, output: ToolOutput) -> Result<()> {
            self.tool_outputs.push((tool_use_id.to_string(), output));
            Ok(())
        }

        fn on_api_exchange(&mut self, _exchange: ApiExchange) -> Result<()> {
            self.exchanges += 1;
            Ok(())
        }
    }

    fn shell(script: &str, extra: &[&str]) -> ProcessDriver {
        let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        ProcessDriver::new("sh", args)
    }

    fn request() -> DriverRequest {
        DriverRequest::builder()
            .messages(vec![Message::user("hello")])
            .model("test-model")
            .provider(ApiProvider::Anthropic)
            .only_n_most_recent_images(3)
            .api_key("sk-secret".to_string())
            .build()
    }

    #[test]
    fn command_line_is_split_on_whitespace() {
        let driver = ProcessDriver::from_command_line("python3  agent.py --fast").unwrap();
        assert_eq!(driver.program(), "python3");
        assert_eq!(driver.args(), ["agent.py", "--fast"]);
        assert!(ProcessDriver::from_command_line("   ").is_err());
    }

    #[tokio::test]
    async fn forwards_events_and_returns_transcript() {
        let driver = shell(
            r#"cat >/dev/null
printf '%s\n' '{"type":"output","block":{"type":"text","text":"hi"}}'
printf '%s\n' 'garbage line'
printf '%s\n' '{"type":"tool_output","tool_use_id":"t1","result":{"output":"ok"}}'
printf '%s\n' '{"type":"api_exchange","exchange":{"request":{"method":"POST","url":"https://api"}}}'
printf '%s\n' '{"type":"transcript","messages":[{"role":"user","content":"hello"},{"role":"assistant","content":"hi"}]}'"#,
            &[],
        );
        let mut recorder = Recorder::default();
        let messages = driver.converse(request(), &mut recorder).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(recorder.outputs, vec![ContentBlock::text("hi")]);
        assert_eq!(recorder.tool_outputs[0].0, "t1");
        assert_eq!(recorder.tool_outputs[0].1.output.as_deref(), Some("ok"));
        assert_eq!(recorder.exchanges, 1);
    }

    #[tokio::test]
    async fn request_goes_to_stdin_and_key_to_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let body = dir.path().join("body.json");
        let key = dir.path().join("key.txt");
        let driver = shell(
            r#"cat > "$1"
printf '%s' "$ANTHROPIC_API_KEY" > "$2"
printf '%s\n' '{"type":"transcript","messages":[]}'"#,
            &[body.to_str().unwrap(), key.to_str().unwrap()],
        );
        let mut recorder = Recorder::default();
        driver.converse(request(), &mut recorder).await.unwrap();

        let sent: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&body).unwrap()).unwrap();
        assert_eq!(sent["model"], "test-model");
        assert_eq!(sent["provider"], "anthropic");
        assert_eq!(sent["only_n_most_recent_images"], 3);
        assert!(sent.get("api_key").is_none());
        assert_eq!(std::fs::read_to_string(&key).unwrap(), "sk-secret");
    }

    #[tokio::test]
    async fn error_event_with_retry_after_is_rate_limit() {
        let driver = shell(
            r#"cat >/dev/null
printf '%s\n' '{"type":"error","message":"too many requests","retry_after_secs":65}'"#,
            &[],
        );
        let mut recorder = Recorder::default();
        let err = driver.converse(request(), &mut recorder).await.unwrap_err();
        assert!(matches!(
            err,
            SortieError::RateLimited {
                retry_after_secs: Some(65),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_transcript_is_a_driver_error() {
        let driver = shell("cat >/dev/null; exit 3", &[]);
        let mut recorder = Recorder::default();
        let err = driver.converse(request(), &mut recorder).await.unwrap_err();
        assert!(matches!(err, SortieError::Driver(msg) if msg.contains("without returning a transcript")));
    }

    #[tokio::test]
    async fn unknown_program_fails_to_start() {
        let driver = ProcessDriver::new("/nonexistent/sortie-driver", Vec::new());
        let mut recorder = Recorder::default();
        let err = driver.converse(request(), &mut recorder).await.unwrap_err();
        assert!(matches!(err, SortieError::Driver(msg) if msg.contains("failed to start")));
    }
}
