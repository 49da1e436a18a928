//! Sortie: a resumable task-queue driver for a tool-using conversational agent.
//!
//! Instructions are read from a JSON list and handed one at a time to an
//! external conversation driver. A durable checkpoint lets a restarted
//! process pick up after the last selected task, turns cut short by a crash
//! or a user stop are healed before the next input, and every finished task
//! is exported once as a JSON conversation log.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sortie::prelude::*;
//!
//! # async fn example() -> sortie::error::Result<()> {
//! let config = SortieConfig::load(None)?;
//! let queue = TaskQueue::open(
//!     load_instructions(&config.instructions_path),
//!     Arc::new(config.checkpoint_store()),
//! );
//! let runner = LoopRunner::new(
//!     Arc::new(config.driver()?),
//!     config.run_settings(),
//!     ErrorReporter::default(),
//! );
//! let renderer = Arc::new(TerminalRenderer::new(&config.export_dir));
//! let mut controller =
//!     SessionController::new(queue, runner, LogFinalizer::default(), renderer);
//! let summary = controller.run_tasks(&CancellationToken::new()).await;
//! println!("{summary:?}");
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod export;
pub mod models;
pub mod prelude;
pub mod queue;
pub mod render;
pub mod session;
pub mod storage;
pub mod types;
