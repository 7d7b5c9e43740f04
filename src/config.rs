use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Preamble used by `worker run` when no instructions file is given.
pub const DEFAULT_REVIEW_INSTRUCTIONS: &str = "You are an AI assistant helping with code review. \
Please analyze the pull request and make any necessary improvements to the code.";

/// Preamble carried by `worker start`.
pub const DEFAULT_IMPLEMENTATION_INSTRUCTIONS: &str = "You are an AI assistant helping with \
implementation. Please analyze the instructions and implement the requested feature.";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_agent")]
    pub agent: Vec<String>,
    #[serde(default = "default_lint")]
    pub lint: Vec<String>,
    #[serde(default = "default_test")]
    pub test: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// File whose content replaces the default instruction preamble.
    #[serde(default)]
    pub instructions_path: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            agent: default_agent(),
            lint: default_lint(),
            test: default_test(),
            timeout_secs: default_timeout_secs(),
            instructions_path: None,
        }
    }
}

impl WorkerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Instruction preamble: the configured file's content, else `default`.
    pub fn instructions(&self, default: &str) -> Result<String> {
        match &self.instructions_path {
            Some(path) => read_instructions(path),
            None => Ok(default.to_string()),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_github_host")]
    pub host: String,
    /// REST endpoint override, e.g. `https://ghe.example.com/api/v3`.
    #[serde(default)]
    pub api_base_url: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            host: default_github_host(),
            api_base_url: None,
        }
    }
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

impl GitHubConfig {
    /// Configured token, else `GITHUB_TOKEN`, else `GH_TOKEN`.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()))
            .or_else(|| std::env::var("GH_TOKEN").ok().filter(|t| !t.is_empty()))
    }

    /// REST base URL; enterprise hosts default to `https://<host>/api/v3`.
    pub fn api_base_url(&self) -> Option<String> {
        if let Some(url) = &self.api_base_url {
            return Some(url.clone());
        }
        if self.host.eq_ignore_ascii_case("github.com") {
            None
        } else {
            Some(format!("https://{}/api/v3", self.host))
        }
    }
}

fn default_agent() -> Vec<String> {
    vec!["amp".to_string(), "--stdin".to_string()]
}

fn default_lint() -> Vec<String> {
    vec!["go".to_string(), "fmt".to_string(), "./...".to_string()]
}

fn default_test() -> Vec<String> {
    vec!["go".to_string(), "test".to_string(), "./...".to_string()]
}

fn default_timeout_secs() -> u64 {
    30 * 60
}

fn default_github_host() -> String {
    "github.com".to_string()
}

fn read_instructions(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!(
            "failed to read instructions file {}: {e}",
            path.display()
        ))
    })
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path));
        } else {
            builder = builder.add_source(config::File::with_name("kratt").required(false));
        }

        // Environment variable overrides with KRATT__ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("KRATT")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("worker.agent")
                .with_list_parse_key("worker.lint")
                .with_list_parse_key("worker.test")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }
}
