//! Configuration management for the CrediFlex gateway
//!
//! Precedence for every setting: environment variable, then the TOML file,
//! then the built-in default.

pub mod file;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::context::{ContextConfig, DEFAULT_INJECTION_WINDOW};
use crate::coordinator::{DEFAULT_FALLBACK_RESPONSE, TurnConfig};
use crate::model::{DEFAULT_TIMEOUT, OpenAiConfig, openai};
use crate::thread::{DEFAULT_MAX_RETAINED, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL, ThreadPolicy};
use crate::{Error, Result};

use self::file::ConfigFile;

/// Built-in CrediFlex assistant instructions
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../../prompts/system.md");

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8000;

/// Default requests per minute across all clients in cloud mode
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 120;

/// CrediFlex gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub storage: StorageConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// API key for admin endpoints (from `CREDIFLEX_API_KEY` env)
    pub api_key: Option<String>,

    /// Cloud mode: enables the global request rate limit
    pub cloud_mode: bool,

    /// Shared budget for every client, not a per-client quota
    pub rate_limit_per_minute: u32,
}

/// Model endpoint configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    /// Replaces [`DEFAULT_SYSTEM_PROMPT`] when set
    pub system_prompt_path: Option<PathBuf>,
    pub fallback_response: String,
}

/// Thread memory configuration
#[derive(Debug, Clone, Copy)]
pub struct MemoryConfig {
    pub max_retained: usize,
    pub injection_window: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_retained: DEFAULT_MAX_RETAINED,
            injection_window: DEFAULT_INJECTION_WINDOW,
            ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Durable mirror configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Mirror threads to `SQLite` so they survive restarts
    pub enabled: bool,
    pub path: PathBuf,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting is out of range
    pub fn load() -> Result<Self> {
        Self::from_sources(|key| std::env::var(key).ok(), file::load_config_file())
    }

    /// Resolve configuration from an environment lookup and a parsed file
    ///
    /// # Errors
    ///
    /// Returns error if a setting is out of range
    pub fn from_sources(env: impl Fn(&str) -> Option<String>, fc: ConfigFile) -> Result<Self> {
        // Server config (env > toml > default)
        let server = ServerConfig {
            port: parsed(&env, "CREDIFLEX_PORT")
                .or_else(|| parsed(&env, "PORT"))
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            api_key: env("CREDIFLEX_API_KEY").filter(|k| !k.is_empty()),
            cloud_mode: flag(&env, "CREDIFLEX_CLOUD_MODE")
                .or(fc.server.cloud_mode)
                .unwrap_or(false),
            rate_limit_per_minute: parsed(&env, "CREDIFLEX_RATE_LIMIT")
                .or(fc.server.rate_limit_per_minute)
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE),
        };

        // LLM config (env > toml > default)
        let llm = LlmConfig {
            api_key: env("OPENAI_API_KEY")
                .or(fc.llm.api_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            base_url: env("CREDIFLEX_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string()),
            model: env("CREDIFLEX_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| openai::DEFAULT_MODEL.to_string()),
            temperature: parsed(&env, "CREDIFLEX_LLM_TEMPERATURE")
                .or(fc.llm.temperature)
                .unwrap_or(openai::DEFAULT_TEMPERATURE),
            timeout: parsed(&env, "CREDIFLEX_LLM_TIMEOUT_SECS")
                .or(fc.llm.timeout_secs)
                .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
            system_prompt_path: env("CREDIFLEX_SYSTEM_PROMPT_PATH")
                .or(fc.llm.system_prompt_path)
                .map(PathBuf::from),
            fallback_response: env("CREDIFLEX_FALLBACK_RESPONSE")
                .or(fc.llm.fallback_response)
                .unwrap_or_else(|| DEFAULT_FALLBACK_RESPONSE.to_string()),
        };

        // Memory config (env > toml > default)
        let default = MemoryConfig::default();
        let memory = MemoryConfig {
            max_retained: parsed(&env, "CREDIFLEX_MAX_RETAINED")
                .or(fc.memory.max_retained)
                .unwrap_or(default.max_retained),
            injection_window: parsed(&env, "CREDIFLEX_INJECTION_WINDOW")
                .or(fc.memory.injection_window)
                .unwrap_or(default.injection_window),
            ttl: parsed(&env, "CREDIFLEX_THREAD_TTL_SECS")
                .or(fc.memory.ttl_secs)
                .map_or(default.ttl, Duration::from_secs),
            sweep_interval: parsed(&env, "CREDIFLEX_SWEEP_INTERVAL_SECS")
                .or(fc.memory.sweep_interval_secs)
                .map_or(default.sweep_interval, Duration::from_secs),
        };

        // Storage config (env > toml > default)
        let storage = StorageConfig {
            enabled: flag(&env, "CREDIFLEX_PERSIST")
                .or(fc.storage.enabled)
                .unwrap_or(false),
            path: env("CREDIFLEX_DB_PATH")
                .or(fc.storage.path)
                .map_or_else(default_db_path, PathBuf::from),
        };

        let config = Self {
            server,
            llm,
            memory,
            storage,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.memory.max_retained < 2 {
            return Err(Error::Config(
                "max_retained must hold at least one message pair".to_string(),
            ));
        }
        if self.memory.ttl.is_zero() {
            return Err(Error::Config("thread ttl must be positive".to_string()));
        }
        if self.memory.sweep_interval.is_zero() {
            return Err(Error::Config("sweep interval must be positive".to_string()));
        }
        if self.llm.timeout.is_zero() {
            return Err(Error::Config("llm timeout must be positive".to_string()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::Config(format!(
                "llm temperature {} is outside 0.0..=2.0",
                self.llm.temperature
            )));
        }
        if self.server.rate_limit_per_minute == 0 {
            return Err(Error::Config("rate limit must be positive".to_string()));
        }
        Ok(())
    }

    /// System prompt text, read from the override file if one is configured
    ///
    /// # Errors
    ///
    /// Returns error if the override file cannot be read
    pub fn system_prompt(&self) -> Result<String> {
        match &self.llm.system_prompt_path {
            Some(path) => {
                let prompt = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("failed to read system prompt {}: {e}", path.display()))
                })?;
                Ok(prompt.trim().to_string())
            }
            None => Ok(DEFAULT_SYSTEM_PROMPT.trim().to_string()),
        }
    }

    #[must_use]
    pub const fn thread_policy(&self) -> ThreadPolicy {
        ThreadPolicy {
            max_retained: self.memory.max_retained,
            ttl: self.memory.ttl,
        }
    }

    #[must_use]
    pub const fn context_config(&self) -> ContextConfig {
        ContextConfig {
            injection_window: self.memory.injection_window,
        }
    }

    #[must_use]
    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig {
            timeout: self.llm.timeout,
            fallback_response: self.llm.fallback_response.clone(),
        }
    }

    /// Model client settings
    ///
    /// # Errors
    ///
    /// Returns error if the system prompt override cannot be read
    pub fn openai_config(&self) -> Result<OpenAiConfig> {
        Ok(OpenAiConfig {
            base_url: self.llm.base_url.clone(),
            api_key: self.llm.api_key.clone(),
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            max_tokens: None,
            system_prompt: self.system_prompt()?,
        })
    }
}

/// Printable view with secrets redacted
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |present: bool| if present { "<set>" } else { "<unset>" };

        writeln!(f, "[server]")?;
        writeln!(f, "port = {}", self.server.port)?;
        writeln!(f, "api_key = {}", set(self.server.api_key.is_some()))?;
        writeln!(f, "cloud_mode = {}", self.server.cloud_mode)?;
        writeln!(f, "rate_limit_per_minute = {}", self.server.rate_limit_per_minute)?;
        writeln!(f)?;
        writeln!(f, "[llm]")?;
        writeln!(f, "api_key = {}", set(self.llm.api_key.is_some()))?;
        writeln!(f, "base_url = {:?}", self.llm.base_url)?;
        writeln!(f, "model = {:?}", self.llm.model)?;
        writeln!(f, "temperature = {}", self.llm.temperature)?;
        writeln!(f, "timeout_secs = {}", self.llm.timeout.as_secs())?;
        match &self.llm.system_prompt_path {
            Some(path) => writeln!(f, "system_prompt_path = {:?}", path.display().to_string())?,
            None => writeln!(f, "system_prompt_path = <built-in>")?,
        }
        writeln!(f)?;
        writeln!(f, "[memory]")?;
        writeln!(f, "max_retained = {}", self.memory.max_retained)?;
        writeln!(f, "injection_window = {}", self.memory.injection_window)?;
        writeln!(f, "ttl_secs = {}", self.memory.ttl.as_secs())?;
        writeln!(f, "sweep_interval_secs = {}", self.memory.sweep_interval.as_secs())?;
        writeln!(f)?;
        writeln!(f, "[storage]")?;
        writeln!(f, "enabled = {}", self.storage.enabled)?;
        write!(f, "path = {:?}", self.storage.path.display().to_string())
    }
}

fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|s| s.trim().parse().ok())
}

fn flag(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    env(key).map(|v| v == "true" || v == "1")
}

/// Default mirror database: `~/.local/share/crediflex/threads.db` on Linux
fn default_db_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("threads.db"),
        |d| d.data_dir().join("crediflex").join("threads.db"),
    )
}
