//! Contract with the external conversation driver.
//!
//! The driver owns model sampling and tool execution for one turn. Sortie
//! hands it the transcript and a set of callbacks, and takes back the
//! updated transcript.

pub mod process;

pub use process::ProcessDriver;

use async_trait::async_trait;
use bon::Builder;
use serde::Serialize;

use crate::error::Result;
use crate::models::ApiProvider;
use crate::types::{ApiExchange, ContentBlock, Message, ToolOutput};

/// Everything the driver needs for one call.
#[derive(Debug, Clone, Builder, Serialize)]
pub struct DriverRequest {
    pub messages: Vec<Message>,
    #[builder(into)]
    pub model: String,
    pub provider: ApiProvider,
    #[builder(into, default)]
    pub system_prompt_suffix: String,
    /// Keep only this many of the most recent screenshots in the payload.
    pub only_n_most_recent_images: Option<usize>,
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Hooks the driver calls while it works.
///
/// An error returned from a hook should abort the driver call and be
/// propagated to the caller.
pub trait DriverCallbacks: Send {
    /// A block produced by the assistant.
    fn on_output(&mut self, block: &ContentBlock) -> Result<()>;
    /// A finished tool execution.
    fn on_tool_output(&mut self, tool_use_id: &str, output: ToolOutput) -> Result<()>;
    /// A raw API request and its response or error.
    fn on_api_exchange(&mut self, exchange: ApiExchange) -> Result<()>;
}

/// External component that runs one agent turn.
#[async_trait]
pub trait ConversationDriver: Send + Sync {
    async fn converse(
        &self,
        request: DriverRequest,
        callbacks: &mut dyn DriverCallbacks,
    ) -> Result<Vec<Message>>;
}
