//! Owner of one session: the task loop and manual turns.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent_loop::{CycleOutcome, LoopRunner};
use crate::error::Result;
use crate::export::LogFinalizer;
use crate::queue::TaskQueue;
use crate::render::{self, Notice, RenderItem, Renderer};
use crate::session::SessionState;
use crate::types::Role;

/// Pause between task cycles unless configured otherwise.
pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_secs(4);

/// Counts from one [`SessionController::run_tasks`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
    pub interrupted: usize,
    /// Whether the queue ran dry (as opposed to a stop).
    pub exhausted: bool,
}

impl RunSummary {
    fn record(&mut self, outcome: CycleOutcome) {
        match outcome {
            CycleOutcome::Completed => self.completed += 1,
            CycleOutcome::Failed => self.failed += 1,
            CycleOutcome::Interrupted => self.interrupted += 1,
            CycleOutcome::Idle => {}
        }
    }
}

pub struct SessionController {
    session: SessionState,
    queue: TaskQueue,
    runner: LoopRunner,
    finalizer: LogFinalizer,
    renderer: Arc<dyn Renderer>,
    cycle_delay: Duration,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("queue", &self.queue)
            .field("runner", &self.runner)
            .field("finalizer", &self.finalizer)
            .field("cycle_delay", &self.cycle_delay)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(
        queue: TaskQueue,
        runner: LoopRunner,
        finalizer: LogFinalizer,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            session: SessionState::new(),
            queue,
            runner,
            finalizer,
            renderer,
            cycle_delay: DEFAULT_CYCLE_DELAY,
        }
    }

    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn finalizer(&self) -> &LogFinalizer {
        &self.finalizer
    }

    /// Send free text typed by the user and answer it.
    pub async fn submit(&mut self, text: &str, stop: &CancellationToken) -> CycleOutcome {
        self.push_turn(text);
        self.runner
            .run_cycle(&mut self.session, &mut self.finalizer, self.renderer.as_ref(), stop)
            .await
    }

    /// Run the next queued task. `None` once the queue is exhausted.
    pub async fn run_next(&mut self, stop: &CancellationToken) -> Option<CycleOutcome> {
        let instruction = self.queue.next()?;
        tracing::info!(
            identifier = %instruction.identifier,
            index = self.queue.position() - 1,
            remaining = self.queue.remaining(),
            "starting task"
        );
        self.renderer.notify(
            Notice::Info,
            &format!("Running task {}", instruction.identifier),
        );
        self.session.current_identifier = Some(instruction.identifier);
        self.push_turn(&instruction.text);
        Some(
            self.runner
                .run_cycle(&mut self.session, &mut self.finalizer, self.renderer.as_ref(), stop)
                .await,
        )
    }

    /// Work through the queue until it runs dry or `stop` fires.
    pub async fn run_tasks(&mut self, stop: &CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        while !stop.is_cancelled() {
            let Some(outcome) = self.run_next(stop).await else {
                tracing::warn!("All tasks are exhausted");
                self.renderer.notify(Notice::Warning, "All tasks are exhausted");
                summary.exhausted = true;
                break;
            };
            summary.started += 1;
            summary.record(outcome);
            if outcome == CycleOutcome::Interrupted || self.queue.remaining() == 0 {
                continue;
            }
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(self.cycle_delay) => {}
            }
        }
        tracing::info!(?summary, "task loop finished");
        summary
    }

    /// Render the whole session again.
    pub fn replay_history(&self) -> Result<()> {
        render::replay_history(&self.session, self.renderer.as_ref())
    }

    /// Forget the conversation. The queue position is untouched.
    pub fn reset(&mut self) {
        self.session.reset();
        tracing::info!("session reset");
        self.renderer.notify(Notice::Info, "Session reset");
    }

    fn push_turn(&mut self, text: &str) {
        self.session.push_user_text(text);
        if let Err(err) = self.renderer.render(Role::User, RenderItem::Text(text)) {
            tracing::warn!(error = %err, "failed to render user turn");
        }
    }
}
