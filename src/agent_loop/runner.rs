//! One driver call per cycle, with guaranteed release of the in-progress flag.

use std::sync::Arc;

use bon::Builder;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::driver::{ConversationDriver, DriverCallbacks, DriverRequest};
use crate::error::{Result, SortieError};
use crate::export::LogFinalizer;
use crate::models::ApiProvider;
use crate::render::{ErrorReporter, Notice, RenderItem, Renderer};
use crate::session::{unpaired_tool_uses, ApiExchangeLog, SessionState, ToolResultCache};
use crate::types::{ApiExchange, ContentBlock, Message, Role, ToolOutput};

use super::types::{CycleId, CycleOutcome};

/// Per-call settings forwarded to the driver.
#[derive(Debug, Clone, Builder)]
pub struct RunSettings {
    #[builder(into)]
    pub model: String,
    #[builder(default)]
    pub provider: ApiProvider,
    #[builder(into, default)]
    pub system_prompt_suffix: String,
    pub only_n_most_recent_images: Option<usize>,
    pub api_key: Option<String>,
}

impl RunSettings {
    /// Settings using the provider's default model.
    pub fn for_provider(provider: ApiProvider) -> Self {
        Self::builder()
            .model(provider.default_model())
            .provider(provider)
            .build()
    }
}

/// Sets the in-progress flag for its lifetime.
///
/// Dropping the guard clears the flag on every exit path. A call abandoned
/// by the user is the exception: [`abandon`](InProgressGuard::abandon) leaves
/// the flag set so the next input gets healed.
pub struct InProgressGuard<'a> {
    flag: &'a mut bool,
    armed: bool,
}

impl<'a> InProgressGuard<'a> {
    pub fn enter(flag: &'a mut bool) -> Self {
        *flag = true;
        Self { flag, armed: true }
    }

    pub fn abandon(mut self) {
        self.armed = false;
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.flag = false;
        }
    }
}

/// Driver callbacks bound to one session.
struct SessionCallbacks<'a> {
    tool_results: &'a mut ToolResultCache,
    api_exchanges: &'a mut ApiExchangeLog,
    renderer: &'a dyn Renderer,
    reporter: &'a ErrorReporter,
    /// Assistant blocks streamed so far, kept in case the call is abandoned.
    partial: Vec<ContentBlock>,
}

impl DriverCallbacks for SessionCallbacks<'_> {
    fn on_output(&mut self, block: &ContentBlock) -> Result<()> {
        self.partial.push(block.clone());
        self.renderer.render(Role::Assistant, RenderItem::Block(block))
    }

    fn on_tool_output(&mut self, tool_use_id: &str, output: ToolOutput) -> Result<()> {
        self.tool_results.insert(tool_use_id.to_string(), output);
        match self.tool_results.get(tool_use_id) {
            Some(cached) => self.renderer.render(Role::Tool, RenderItem::ToolOutput(cached)),
            None => Err(SortieError::InvalidState(format!("tool result {tool_use_id} vanished"))),
        }
    }

    fn on_api_exchange(&mut self, exchange: ApiExchange) -> Result<()> {
        let failure = exchange.error.clone();
        let id = self.api_exchanges.record(exchange);
        if let Some(message) = failure {
            self.reporter.report(self.renderer, &SortieError::Driver(message));
        }
        match self.api_exchanges.get(&id) {
            Some(recorded) => self.renderer.render_api_exchange(&id, recorded),
            None => Err(SortieError::InvalidState(format!("api exchange {id} vanished"))),
        }
    }
}

/// Runs the driver for a session and finalizes the cycle.
pub struct LoopRunner {
    driver: Arc<dyn ConversationDriver>,
    settings: RunSettings,
    reporter: ErrorReporter,
}

impl std::fmt::Debug for LoopRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopRunner")
            .field("model", &self.settings.model)
            .field("provider", &self.settings.provider)
            .finish_non_exhaustive()
    }
}

impl LoopRunner {
    pub fn new(driver: Arc<dyn ConversationDriver>, settings: RunSettings, reporter: ErrorReporter) -> Self {
        Self {
            driver,
            settings,
            reporter,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// Answer the pending user turn, if any.
    ///
    /// The finalizer runs after every cycle that reached the driver stage,
    /// except for one abandoned by `stop`.
    pub async fn run_cycle(
        &self,
        session: &mut SessionState,
        finalizer: &mut LogFinalizer,
        renderer: &dyn Renderer,
        stop: &CancellationToken,
    ) -> CycleOutcome {
        if !session.awaiting_response() {
            return CycleOutcome::Idle;
        }

        let cycle_id: CycleId = Uuid::new_v4();
        let identifier = session.active_identifier().to_string();
        let span = tracing::info_span!("cycle", %cycle_id, identifier = %identifier);
        let outcome = self
            .drive(session, renderer, stop)
            .instrument(span.clone())
            .await;

        let _entered = span.enter();
        if outcome != CycleOutcome::Interrupted {
            let report = finalizer.finish_cycle(&mut session.transcript, &identifier, renderer);
            if report.reset {
                session.tool_results.clear();
                session.api_exchanges.clear();
            }
        }
        tracing::info!(outcome = %outcome, in_progress = session.in_progress, "cycle finished");
        outcome
    }

    async fn drive(
        &self,
        session: &mut SessionState,
        renderer: &dyn Renderer,
        stop: &CancellationToken,
    ) -> CycleOutcome {
        let unpaired = unpaired_tool_uses(&session.transcript);
        if !unpaired.is_empty() {
            let err = SortieError::ProtocolInvariant(format!(
                "tool calls without results: {}",
                unpaired.join(", ")
            ));
            self.reporter.report(renderer, &err);
            return CycleOutcome::Failed;
        }

        let request = DriverRequest::builder()
            .messages(session.transcript.clone())
            .model(self.settings.model.clone())
            .provider(self.settings.provider)
            .system_prompt_suffix(self.settings.system_prompt_suffix.clone())
            .maybe_only_n_most_recent_images(self.settings.only_n_most_recent_images)
            .maybe_api_key(self.settings.api_key.clone())
            .build();

        let guard = InProgressGuard::enter(&mut session.in_progress);
        let mut callbacks = SessionCallbacks {
            tool_results: &mut session.tool_results,
            api_exchanges: &mut session.api_exchanges,
            renderer,
            reporter: &self.reporter,
            partial: Vec::new(),
        };
        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            result = self.driver.converse(request, &mut callbacks) => Some(result),
        };
        let partial = callbacks.partial;

        match result {
            None => {
                guard.abandon();
                // Keep what the assistant already asked for so its tool
                // calls can be healed on the next input.
                if !partial.is_empty() {
                    session
                        .transcript
                        .push(Message::with_blocks(Role::Assistant, partial));
                }
                tracing::warn!("driver call abandoned by user stop");
                renderer.notify(Notice::Warning, "Stopped. The next message will resume the conversation.");
                CycleOutcome::Interrupted
            }
            Some(Ok(messages)) => {
                session.transcript = messages;
                drop(guard);
                CycleOutcome::Completed
            }
            Some(Err(err)) => {
                drop(guard);
                self.reporter.report(renderer, &err);
                CycleOutcome::Failed
            }
        }
    }
}
