//! Configuration system (layered: defaults < TOML file < env < CLI flags).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::agent_loop::RunSettings;
use crate::checkpoint::FileCheckpointStore;
use crate::driver::ProcessDriver;
use crate::error::{Result, SortieError};
use crate::export::{PrefixRetention, DEFAULT_PRESERVE_PREFIX};
use crate::models::ApiProvider;
use crate::storage::{default_storage_dir, FileSecretStore, SecretStore};

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "sortie.toml";

/// Secret store entry holding the API key.
pub const API_KEY_SECRET: &str = "api_key";

/// Secret store entry holding the system prompt suffix.
pub const SYSTEM_PROMPT_SECRET: &str = "system_prompt";

/// Resolved settings for one process.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortieConfig {
    pub instructions_path: PathBuf,
    /// Defaults to `last_task.json` under `storage_dir`.
    pub checkpoint_path: Option<PathBuf>,
    pub storage_dir: PathBuf,
    pub export_dir: PathBuf,
    pub provider: ApiProvider,
    /// Defaults to the provider's model.
    pub model: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub system_prompt_suffix: String,
    pub only_n_most_recent_images: Option<usize>,
    pub hide_images: bool,
    pub cycle_delay_secs: u64,
    pub preserve_prefix: String,
    pub driver_command: Option<String>,
}

impl fmt::Debug for SortieConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortieConfig")
            .field("instructions_path", &self.instructions_path)
            .field("checkpoint_path", &self.checkpoint_path())
            .field("storage_dir", &self.storage_dir)
            .field("export_dir", &self.export_dir)
            .field("provider", &self.provider)
            .field("model", &self.model())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("only_n_most_recent_images", &self.only_n_most_recent_images)
            .field("hide_images", &self.hide_images)
            .field("cycle_delay_secs", &self.cycle_delay_secs)
            .field("preserve_prefix", &self.preserve_prefix)
            .field("driver_command", &self.driver_command)
            .finish()
    }
}

impl Default for SortieConfig {
    fn default() -> Self {
        Self {
            instructions_path: PathBuf::from("tasks.json"),
            checkpoint_path: None,
            storage_dir: default_storage_dir(),
            export_dir: PathBuf::from("logs"),
            provider: ApiProvider::default(),
            model: None,
            api_key: None,
            system_prompt_suffix: String::new(),
            only_n_most_recent_images: Some(3),
            hide_images: false,
            cycle_delay_secs: 4,
            preserve_prefix: DEFAULT_PRESERVE_PREFIX.to_string(),
            driver_command: None,
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub instructions_path: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
    pub provider: Option<ApiProvider>,
    pub model: Option<String>,
    pub driver_command: Option<String>,
    pub hide_images: bool,
    pub cycle_delay_secs: Option<u64>,
}

impl SortieConfig {
    /// Parse a TOML document over the defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Defaults, then the config file, then `.env` and the environment.
    ///
    /// An explicit `file` must exist; the implicit `sortie.toml` is optional.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => {
                let implicit = Path::new(DEFAULT_CONFIG_FILE);
                if implicit.is_file() {
                    Self::from_file(implicit)?
                } else {
                    Self::default()
                }
            }
        };
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|err| {
            SortieError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply environment variables through `env`.
    pub fn apply_env<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        if let Some(path) = var("SORTIE_TASKS") {
            self.instructions_path = PathBuf::from(path);
        }
        if let Some(path) = var("SORTIE_CHECKPOINT") {
            self.checkpoint_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = var("SORTIE_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("SORTIE_EXPORT_DIR") {
            self.export_dir = PathBuf::from(dir);
        }
        if let Some(name) = var("API_PROVIDER") {
            self.provider = name.trim().parse().map_err(|_| {
                SortieError::Configuration(format!(
                    "unknown API_PROVIDER {name:?} (expected anthropic, bedrock or vertex)"
                ))
            })?;
        }
        if let Some(model) = var("SORTIE_MODEL") {
            self.model = Some(model);
        }
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(limit) = var("SORTIE_IMAGE_LIMIT") {
            self.only_n_most_recent_images = parse_image_limit(&limit)?;
        }
        if let Some(command) = var("SORTIE_DRIVER") {
            self.driver_command = Some(command);
        }
        Ok(())
    }

    /// Apply command-line flags, the highest layer.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(path) = overrides.instructions_path {
            self.instructions_path = path;
        }
        if let Some(path) = overrides.checkpoint_path {
            self.checkpoint_path = Some(path);
        }
        if let Some(dir) = overrides.export_dir {
            self.export_dir = dir;
        }
        if let Some(provider) = overrides.provider {
            self.provider = provider;
        }
        if let Some(model) = overrides.model {
            self.model = Some(model);
        }
        if let Some(command) = overrides.driver_command {
            self.driver_command = Some(command);
        }
        if overrides.hide_images {
            self.hide_images = true;
        }
        if let Some(secs) = overrides.cycle_delay_secs {
            self.cycle_delay_secs = secs;
        }
    }

    /// Fill credentials and the system prompt from the secret store.
    ///
    /// A stored API key wins over `ANTHROPIC_API_KEY`. Store failures are
    /// logged and leave the current values in place.
    pub fn apply_secrets(&mut self, store: &dyn SecretStore) {
        match store.load(API_KEY_SECRET) {
            Ok(Some(key)) => self.api_key = Some(key),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "failed to read stored API key"),
        }
        match store.load(SYSTEM_PROMPT_SECRET) {
            Ok(Some(prompt)) => self.system_prompt_suffix = prompt,
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "failed to read stored system prompt"),
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(|| self.storage_dir.join("last_task.json"))
    }

    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    pub fn secret_store(&self) -> FileSecretStore {
        FileSecretStore::new(&self.storage_dir)
    }

    pub fn checkpoint_store(&self) -> FileCheckpointStore {
        FileCheckpointStore::new(self.checkpoint_path())
    }

    pub fn reset_policy(&self) -> PrefixRetention {
        PrefixRetention::new(&self.preserve_prefix)
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings::builder()
            .model(self.model())
            .provider(self.provider)
            .system_prompt_suffix(self.system_prompt_suffix.clone())
            .maybe_only_n_most_recent_images(self.only_n_most_recent_images)
            .maybe_api_key(self.api_key.clone())
            .build()
    }

    /// The external driver command, required to run anything.
    pub fn driver(&self) -> Result<ProcessDriver> {
        let command = self.driver_command.as_deref().ok_or_else(|| {
            SortieError::Configuration(
                "no driver command configured; set SORTIE_DRIVER or driver_command".to_string(),
            )
        })?;
        ProcessDriver::from_command_line(command)
    }

    /// Human message when the provider cannot be used, `None` when it can.
    pub fn auth_problem(&self) -> Option<String> {
        self.provider.validate_auth(self.api_key.as_deref())
    }
}

/// `"0"` and `"none"` disable trimming.
fn parse_image_limit(value: &str) -> Result<Option<usize>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    match value.parse::<usize>() {
        Ok(0) => Ok(None),
        Ok(limit) => Ok(Some(limit)),
        Err(_) => Err(SortieError::Configuration(format!(
            "SORTIE_IMAGE_LIMIT must be a number or \"none\", got {value:?}"
        ))),
    }
}
