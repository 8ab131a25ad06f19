//! Configuration management
//!
//! Settings are resolved in this order of precedence:
//! 1. Environment variables
//! 2. `chatlog.toml` in the working directory
//! 3. Defaults
//!
//! `${VAR_NAME}` inside the config file is expanded from the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::router::Mode;
use crate::Error;

const CONFIG_FILE: &str = "chatlog.toml";

/// Remote responder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key (empty when not configured)
    #[serde(default, skip_serializing)]
    pub api_key: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,

    /// Reply length limit sent with each request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout; expiry is reported as a network failure
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    /// Effective base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

fn default_model() -> String {
    "deepseek/deepseek-chat-v3.1".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "data/chatlog.db".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Responder used at startup
    #[serde(default)]
    pub mode: Mode,
}

/// Main configuration for chatlog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub chat: ChatConfig,
}

impl Config {
    /// Expand `${VAR_NAME}` references; unknown variables expand to nothing
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Parse a TOML document, expanding environment references first
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load from a TOML file, then apply environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&content)?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// Load from `chatlog.toml` if present, otherwise from the environment only
    pub fn load() -> crate::Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            return Self::from_toml_file(CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> crate::Result<()> {
        if let Some(api_key) = non_empty_var("LLM_API_KEY").or_else(|| non_empty_var("OPENROUTER_API_KEY")) {
            self.llm.api_key = api_key;
        }
        if let Some(model) = non_empty_var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(base_url) = non_empty_var("LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }
        if let Some(timeout) = non_empty_var("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = timeout
                .parse()
                .map_err(|_| Error::Config(format!("Invalid LLM_TIMEOUT_SECS: {}", timeout)))?;
        }

        if let Some(path) = non_empty_var("DB_PATH") {
            self.storage.db_path = path;
        }

        if let Some(mode) = non_empty_var("CHAT_MODE") {
            self.chat.mode = mode.parse()?;
        }

        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
