//! CLI command handlers.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::agent_loop::LoopRunner;
use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::config::{SortieConfig, API_KEY_SECRET, SYSTEM_PROMPT_SECRET};
use crate::controller::SessionController;
use crate::error::SortieError;
use crate::export::LogFinalizer;
use crate::queue::{load_instructions, TaskQueue};
use crate::render::{ErrorReporter, Renderer, TerminalRenderer};
use crate::storage::SecretStore;

use super::{Cli, Commands, KeyCommands, PromptCommands};

type HandlerResult = Result<(), Box<dyn std::error::Error>>;

/// Resolve configuration and run the selected command.
pub async fn dispatch(cli: Cli) -> HandlerResult {
    let mut config = SortieConfig::load(cli.config.as_deref())?;
    config.apply_overrides(cli.overrides.into_overrides());
    let secrets = config.secret_store();
    config.apply_secrets(&secrets);
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Run => handle_run(&config).await,
        Commands::Chat(args) => handle_chat(&config, args.prompt).await,
        Commands::Status => handle_status(&config),
        Commands::Reset => handle_reset(&config),
        Commands::Key(args) => match args.command {
            KeyCommands::Set { value } => handle_key_set(&config, value).await,
            KeyCommands::Clear => handle_clear(&config, API_KEY_SECRET, "API key"),
        },
        Commands::Prompt(args) => match args.command {
            PromptCommands::Set { text } => {
                config.secret_store().save(SYSTEM_PROMPT_SECRET, &text)?;
                println!("System prompt suffix saved.");
                Ok(())
            }
            PromptCommands::Clear => handle_clear(&config, SYSTEM_PROMPT_SECRET, "System prompt suffix"),
        },
    }
}

/// Handle `sortie run`.
pub async fn handle_run(config: &SortieConfig) -> HandlerResult {
    require_auth(config)?;
    let instructions = load_instructions(&config.instructions_path);
    if instructions.is_empty() {
        tracing::warn!(path = %config.instructions_path.display(), "no instructions to run");
    }
    let queue = TaskQueue::open(instructions, Arc::new(config.checkpoint_store()));
    let mut controller = build_controller(config, queue)?;

    let stop = CancellationToken::new();
    let watcher = stop_on_ctrl_c(stop.clone());
    let summary = controller.run_tasks(&stop).await;
    watcher.abort();

    println!(
        "Ran {} task(s): {} completed, {} failed, {} interrupted{}",
        summary.started,
        summary.completed,
        summary.failed,
        summary.interrupted,
        if summary.exhausted { "; queue exhausted" } else { "" }
    );
    Ok(())
}

/// Handle `sortie chat [PROMPT]`.
pub async fn handle_chat(config: &SortieConfig, prompt: Option<String>) -> HandlerResult {
    require_auth(config)?;
    let queue = TaskQueue::open(Vec::new(), Arc::new(MemoryCheckpointStore::new()));
    let mut controller = build_controller(config, queue)?;

    let turns = TurnInterrupts::default();
    let watcher = watch_ctrl_c(turns.clone());
    let result = match prompt {
        Some(prompt) => {
            submit_turn(&mut controller, &turns, &prompt).await;
            Ok(())
        }
        None => chat_repl(&mut controller, &turns).await,
    };
    watcher.abort();
    result
}

async fn chat_repl(controller: &mut SessionController, turns: &TurnInterrupts) -> HandlerResult {
    eprintln!("Type a message. /history replays the session, /reset clears it, /quit exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => controller.replay_history()?,
            "/reset" => controller.reset(),
            text => submit_turn(controller, turns, text).await,
        }
    }
    Ok(())
}

/// Handle `sortie status`.
pub fn handle_status(config: &SortieConfig) -> HandlerResult {
    let instructions = load_instructions(&config.instructions_path);
    let store = config.checkpoint_store();
    let checkpoint = store.load().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "checkpoint unreadable");
        None
    });
    let queue = TaskQueue::open(instructions, Arc::new(store));

    println!("Instructions: {} ({} loaded)", config.instructions_path.display(), queue.len());
    println!("Checkpoint:   {}", config.checkpoint_path().display());
    println!("Last task:    {}", checkpoint.as_deref().unwrap_or("(none)"));
    match queue.instructions().get(queue.position()) {
        Some(next) => println!("Next task:    {} ({} remaining)", next.identifier, queue.remaining()),
        None => println!("Next task:    (none, all tasks are exhausted)"),
    }
    println!("Provider:     {} / {}", config.provider, config.model());
    match config.auth_problem() {
        Some(problem) => println!("Credentials:  missing ({problem})"),
        None => println!("Credentials:  ok"),
    }
    Ok(())
}

/// Handle `sortie reset`.
pub fn handle_reset(config: &SortieConfig) -> HandlerResult {
    config.checkpoint_store().clear()?;
    println!("Checkpoint cleared; the next run starts from the first task.");
    Ok(())
}

/// Handle `sortie key set [VALUE]`.
pub async fn handle_key_set(config: &SortieConfig, value: Option<String>) -> HandlerResult {
    let value = match value {
        Some(value) => value,
        None => {
            eprintln!("Paste the API key and press enter:");
            BufReader::new(tokio::io::stdin())
                .lines()
                .next_line()
                .await?
                .unwrap_or_default()
        }
    };
    if value.trim().is_empty() {
        return Err(SortieError::Authentication("API key is empty".to_string()).into());
    }
    config.secret_store().save(API_KEY_SECRET, value.trim())?;
    println!("API key saved to {}", config.storage_dir.display());
    Ok(())
}

fn handle_clear(config: &SortieConfig, name: &str, label: &str) -> HandlerResult {
    config.secret_store().clear(name)?;
    println!("{label} cleared.");
    Ok(())
}

fn require_auth(config: &SortieConfig) -> Result<(), SortieError> {
    match config.auth_problem() {
        Some(problem) => Err(SortieError::Authentication(problem)),
        None => Ok(()),
    }
}

fn build_controller(config: &SortieConfig, queue: TaskQueue) -> Result<SessionController, SortieError> {
    let driver = Arc::new(config.driver()?);
    let reporter = ErrorReporter::new(Some(Arc::new(config.secret_store()) as Arc<dyn SecretStore>));
    let runner = LoopRunner::new(driver, config.run_settings(), reporter);
    let renderer: Arc<dyn Renderer> =
        Arc::new(TerminalRenderer::new(&config.export_dir).hide_images(config.hide_images));
    let finalizer = LogFinalizer::new(config.reset_policy());
    Ok(SessionController::new(queue, runner, finalizer, renderer).with_cycle_delay(config.cycle_delay()))
}

async fn submit_turn(controller: &mut SessionController, turns: &TurnInterrupts, text: &str) {
    let stop = turns.begin();
    let outcome = controller.submit(text, &stop).await;
    turns.finish();
    tracing::debug!(%outcome, "turn finished");
}

fn stop_on_ctrl_c(stop: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping");
            stop.cancel();
        }
    })
}

/// Stop token of the chat turn in flight, if any.
///
/// Each turn gets a fresh token so Ctrl-C ends the turn but not the REPL.
#[derive(Clone, Default)]
struct TurnInterrupts {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl TurnInterrupts {
    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.slot() = Some(token.clone());
        token
    }

    fn finish(&self) {
        self.slot().take();
    }

    /// Cancel the running turn. Returns `false` when no turn was running.
    fn interrupt(&self) -> bool {
        match self.slot().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One watcher for the whole chat session: Ctrl-C during a turn stops that
/// turn, Ctrl-C at the prompt exits.
fn watch_ctrl_c(turns: TurnInterrupts) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if turns.interrupt() {
                tracing::warn!("interrupt received, stopping the current turn");
            } else {
                eprintln!();
                std::process::exit(130);
            }
        }
    })
}
