//! API provider selection and credential validation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Backend the conversation driver talks to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ApiProvider {
    #[default]
    Anthropic,
    Bedrock,
    Vertex,
}

impl ApiProvider {
    /// Model used when none is configured explicitly.
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-sonnet-20241022",
            Self::Bedrock => "anthropic.claude-3-5-sonnet-20241022-v2:0",
            Self::Vertex => "claude-3-5-sonnet-v2@20241022",
        }
    }

    /// Check that credentials for this provider look usable.
    ///
    /// Returns a human-readable message describing what is missing, or `None`
    /// when the provider can be used.
    pub fn validate_auth(self, api_key: Option<&str>) -> Option<String> {
        self.validate_auth_with(api_key, |name| std::env::var(name).ok(), home_dir())
    }

    /// Same as [`validate_auth`](Self::validate_auth) with an injectable
    /// environment lookup and home directory.
    pub fn validate_auth_with<F>(self, api_key: Option<&str>, env: F, home: Option<PathBuf>) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_set = |name: &str| env(name).is_some_and(|v| !v.trim().is_empty());
        match self {
            Self::Anthropic => {
                if api_key.is_some_and(|k| !k.trim().is_empty()) {
                    None
                } else {
                    Some("Enter your Anthropic API key to continue.".to_string())
                }
            }
            Self::Bedrock => {
                let shared_file = home
                    .map(|h| h.join(".aws").join("credentials").is_file())
                    .unwrap_or(false);
                if is_set("AWS_ACCESS_KEY_ID") || is_set("AWS_PROFILE") || shared_file {
                    None
                } else {
                    Some("You must have AWS credentials set up to use the Bedrock API.".to_string())
                }
            }
            Self::Vertex => {
                if !is_set("CLOUD_ML_REGION") {
                    return Some(
                        "Set the CLOUD_ML_REGION environment variable to use the Vertex API."
                            .to_string(),
                    );
                }
                let adc = home
                    .map(|h| {
                        h.join(".config")
                            .join("gcloud")
                            .join("application_default_credentials.json")
                            .is_file()
                    })
                    .unwrap_or(false);
                if is_set("GOOGLE_APPLICATION_CREDENTIALS") || adc {
                    None
                } else {
                    Some("Your google cloud credentials are not set up correctly.".to_string())
                }
            }
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}
