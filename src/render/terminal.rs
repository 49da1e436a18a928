//! Plain-text renderer for the command line.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::{Notice, RenderItem, Renderer};
use crate::error::{Result, SortieError};
use crate::types::{ApiExchange, ContentBlock, Role};

/// Writes chat output to a stream and saves delivered artifacts to disk.
pub struct TerminalRenderer {
    export_dir: PathBuf,
    hide_images: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for TerminalRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalRenderer")
            .field("export_dir", &self.export_dir)
            .field("hide_images", &self.hide_images)
            .finish()
    }
}

impl TerminalRenderer {
    /// Render to stdout.
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self::with_writer(export_dir, Box::new(std::io::stdout()))
    }

    pub fn with_writer(export_dir: impl Into<PathBuf>, out: Box<dyn Write + Send>) -> Self {
        Self {
            export_dir: export_dir.into(),
            hide_images: false,
            out: Mutex::new(out),
        }
    }

    pub fn hide_images(mut self, hide: bool) -> Self {
        self.hide_images = hide;
        self
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| SortieError::Render("output stream lock poisoned".into()))?;
        writeln!(out, "{line}").map_err(|err| SortieError::Render(err.to_string()))?;
        out.flush().map_err(|err| SortieError::Render(err.to_string()))
    }
}

fn prefix(role: Role) -> &'static str {
    match role {
        Role::User => "[user]",
        Role::Assistant => "[assistant]",
        Role::Tool => "[tool]",
    }
}

impl Renderer for TerminalRenderer {
    fn render(&self, role: Role, item: RenderItem<'_>) -> Result<()> {
        let tag = prefix(role);
        match item {
            RenderItem::Text(text) => {
                if text.is_empty() {
                    return Ok(());
                }
                self.write_line(&format!("{tag} {text}"))
            }
            RenderItem::Block(ContentBlock::Text { text }) => self.write_line(&format!("{tag} {text}")),
            RenderItem::Block(ContentBlock::ToolUse { name, input, .. }) => {
                self.write_line(&format!("{tag} Tool Use: {name}\n  Input: {input}"))
            }
            RenderItem::Block(ContentBlock::ToolResult { tool_use_id, .. }) => Err(SortieError::Render(format!(
                "tool result {tool_use_id} must be rendered from the tool result cache"
            ))),
            RenderItem::ToolOutput(output) => {
                if self.hide_images && output.is_image_only() {
                    return Ok(());
                }
                if let Some(text) = &output.output {
                    self.write_line(&format!("{tag} {text}"))?;
                }
                if let Some(error) = &output.error {
                    self.write_line(&format!("{tag} error: {error}"))?;
                }
                if let Some(image) = &output.base64_image {
                    if !self.hide_images {
                        self.write_line(&format!("{tag} [screenshot, {} base64 bytes]", image.len()))?;
                    }
                }
                Ok(())
            }
        }
    }

    fn render_api_exchange(&self, id: &str, exchange: &ApiExchange) -> Result<()> {
        let status = exchange.response.as_ref().map(|r| r.status);
        tracing::debug!(
            exchange_id = id,
            method = %exchange.request.method,
            url = %exchange.request.url,
            status = ?status,
            error = ?exchange.error,
            "api exchange"
        );
        Ok(())
    }

    fn render_error(&self, title: &str, body: &str) {
        eprintln!("\n{title}\n\n{body}\n");
    }

    fn notify(&self, level: Notice, message: &str) {
        match level {
            Notice::Info => tracing::info!("{message}"),
            Notice::Success => {
                if let Err(err) = self.write_line(&format!("ok: {message}")) {
                    tracing::warn!(error = %err, "failed to write notice");
                }
            }
            Notice::Warning => eprintln!("warning: {message}"),
        }
    }

    fn deliver_artifact(&self, file_name: &str, encoded: &str) -> Result<()> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|err| SortieError::Render(format!("artifact is not valid base64: {err}")))?;
        fs::create_dir_all(&self.export_dir)?;
        let path = self.export_dir.join(file_name);
        fs::write(&path, bytes)?;
        tracing::info!(path = %path.display(), "saved conversation log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolOutput;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn renderer(dir: &Path) -> (TerminalRenderer, SharedBuf) {
        let buf = SharedBuf::default();
        let renderer = TerminalRenderer::with_writer(dir, Box::new(buf.clone()));
        (renderer, buf)
    }

    #[test]
    fn renders_text_and_tool_use() {
        let dir = tempfile::TempDir::new().unwrap();
        let (r, buf) = renderer(dir.path());
        r.render(Role::User, RenderItem::Text("hello")).unwrap();
        r.render(
            Role::Assistant,
            RenderItem::Block(&ContentBlock::ToolUse {
                id: "t".into(),
                name: "bash".into(),
                input: json!({"command": "ls"}),
            }),
        )
        .unwrap();
        let text = buf.text();
        assert!(text.contains("[user] hello"));
        assert!(text.contains("Tool Use: bash"));
        assert!(text.contains(r#"{"command":"ls"}"#));
    }

    #[test]
    fn raw_tool_result_blocks_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let (r, _buf) = renderer(dir.path());
        let block = ContentBlock::error_result("t9", "x");
        assert!(matches!(
            r.render(Role::User, RenderItem::Block(&block)),
            Err(SortieError::Render(_))
        ));
    }

    #[test]
    fn hidden_images_skip_image_only_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let (r, buf) = renderer(dir.path());
        let r = r.hide_images(true);
        let image_only = ToolOutput {
            base64_image: Some("aGVsbG8=".into()),
            ..ToolOutput::default()
        };
        r.render(Role::Tool, RenderItem::ToolOutput(&image_only)).unwrap();
        assert!(buf.text().is_empty());

        let with_error = ToolOutput {
            error: Some("failed".into()),
            base64_image: Some("aGVsbG8=".into()),
            ..ToolOutput::default()
        };
        r.render(Role::Tool, RenderItem::ToolOutput(&with_error)).unwrap();
        assert_eq!(buf.text(), "[tool] error: failed\n");
    }

    #[test]
    fn delivered_artifacts_are_decoded_to_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let (r, _buf) = renderer(&dir.path().join("logs"));
        r.deliver_artifact("chat_log_2025-01-01_a.json", &STANDARD.encode(b"{\"ok\":true}"))
            .unwrap();
        let saved = fs::read_to_string(dir.path().join("logs").join("chat_log_2025-01-01_a.json")).unwrap();
        assert_eq!(saved, "{\"ok\":true}");
        assert!(r.deliver_artifact("x.json", "%%%").is_err());
    }
}
