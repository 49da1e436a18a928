//! Convenience re-exports for common use.

pub use crate::agent_loop::{CycleOutcome, LoopRunner, RunSettings};
pub use crate::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use crate::config::SortieConfig;
pub use crate::controller::{RunSummary, SessionController};
pub use crate::driver::{ConversationDriver, DriverCallbacks, DriverRequest, ProcessDriver};
pub use crate::error::{Result, SortieError};
pub use crate::export::{LogFinalizer, PrefixRetention, ResetPolicy};
pub use crate::models::ApiProvider;
pub use crate::queue::{load_instructions, TaskQueue};
pub use crate::render::{ErrorReporter, Renderer, TerminalRenderer};
pub use crate::session::SessionState;
pub use crate::types::{ContentBlock, Instruction, Message, Role, ToolOutput};
pub use tokio_util::sync::CancellationToken;
