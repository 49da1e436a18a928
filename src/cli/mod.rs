//! CLI entry point for Sortie.

pub mod handlers;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ConfigOverrides;
use crate::models::ApiProvider;

/// Sortie task runner
#[derive(Parser, Debug)]
#[command(name = "sortie", version, about = "Resumable task-queue driver for a tool-using agent")]
pub struct Cli {
    /// Config file (defaults to ./sortie.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that override the config file and environment.
#[derive(Args, Debug, Default)]
pub struct OverrideArgs {
    /// Instruction list (JSON array of {identifier, task})
    #[arg(long, global = true)]
    pub tasks: Option<PathBuf>,

    /// Checkpoint file
    #[arg(long, global = true)]
    pub checkpoint: Option<PathBuf>,

    /// Directory for exported conversation logs
    #[arg(long, global = true)]
    pub export_dir: Option<PathBuf>,

    /// API provider (anthropic, bedrock, vertex)
    #[arg(long, global = true)]
    pub provider: Option<ApiProvider>,

    /// Model id (defaults to the provider's model)
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Driver command line, e.g. "python3 agent.py"
    #[arg(long, global = true)]
    pub driver: Option<String>,

    /// Do not print screenshots
    #[arg(long, global = true)]
    pub hide_images: bool,

    /// Seconds to wait between tasks
    #[arg(long, global = true)]
    pub cycle_delay: Option<u64>,
}

impl OverrideArgs {
    pub fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            instructions_path: self.tasks,
            checkpoint_path: self.checkpoint,
            export_dir: self.export_dir,
            provider: self.provider,
            model: self.model,
            driver_command: self.driver,
            hide_images: self.hide_images,
            cycle_delay_secs: self.cycle_delay,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Work through the instruction list, resuming after the checkpoint
    Run,
    /// Talk to the agent directly
    Chat(ChatArgs),
    /// Show configuration and queue position
    Status,
    /// Forget the checkpoint so the next run starts from the first task
    Reset,
    /// Manage the stored API key
    Key(KeyArgs),
    /// Manage the stored system prompt suffix
    Prompt(PromptArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Single prompt; reads lines from stdin when omitted
    pub prompt: Option<String>,
}

#[derive(Parser, Debug)]
pub struct KeyArgs {
    #[command(subcommand)]
    pub command: KeyCommands,
}

#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Save an API key (read from stdin when omitted)
    Set { value: Option<String> },
    /// Remove the stored API key
    Clear,
}

#[derive(Parser, Debug)]
pub struct PromptArgs {
    #[command(subcommand)]
    pub command: PromptCommands,
}

#[derive(Subcommand, Debug)]
pub enum PromptCommands {
    /// Save text appended to the driver's system prompt
    Set { text: String },
    /// Remove the stored system prompt suffix
    Clear,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "sortie",
            "run",
            "--tasks",
            "suite.json",
            "--provider",
            "Vertex",
            "--driver",
            "python3 agent.py",
            "--cycle-delay",
            "0",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Run));
        let overrides = cli.overrides.into_overrides();
        assert_eq!(overrides.instructions_path, Some(PathBuf::from("suite.json")));
        assert_eq!(overrides.provider, Some(ApiProvider::Vertex));
        assert_eq!(overrides.driver_command.as_deref(), Some("python3 agent.py"));
        assert_eq!(overrides.cycle_delay_secs, Some(0));
        assert!(!overrides.hide_images);
    }

    #[test]
    fn parse_chat_with_prompt() {
        let cli = Cli::try_parse_from(["sortie", "chat", "--hide-images", "open the browser"]).unwrap();
        match cli.command {
            Commands::Chat(args) => assert_eq!(args.prompt.as_deref(), Some("open the browser")),
            other => panic!("expected Chat, got {other:?}"),
        }
        assert!(cli.overrides.hide_images);
    }

    #[test]
    fn parse_chat_without_prompt() {
        let cli = Cli::try_parse_from(["sortie", "chat"]).unwrap();
        match cli.command {
            Commands::Chat(args) => assert!(args.prompt.is_none()),
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn parse_key_set_and_clear() {
        let cli = Cli::try_parse_from(["sortie", "key", "set", "sk-test"]).unwrap();
        match cli.command {
            Commands::Key(args) => match args.command {
                KeyCommands::Set { value } => assert_eq!(value.as_deref(), Some("sk-test")),
                other => panic!("expected Set, got {other:?}"),
            },
            other => panic!("expected Key, got {other:?}"),
        }
        let cli = Cli::try_parse_from(["sortie", "key", "clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Key(KeyArgs {
                command: KeyCommands::Clear
            })
        ));
    }

    #[test]
    fn parse_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["sortie", "status", "--config", "ci.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
    }

    #[test]
    fn parse_unknown_provider_is_error() {
        assert!(Cli::try_parse_from(["sortie", "run", "--provider", "openai"]).is_err());
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["sortie"]).is_err());
    }
}
