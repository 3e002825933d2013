//! TOML configuration file loading
//!
//! Supports `~/.config/crediflex/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Model endpoint settings
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Thread memory settings
    #[serde(default)]
    pub memory: MemoryFileConfig,

    /// Durable mirror settings
    #[serde(default)]
    pub storage: StorageFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Cloud mode toggle
    pub cloud_mode: Option<bool>,

    /// Requests per minute across all clients in cloud mode
    pub rate_limit_per_minute: Option<u32>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL (e.g. "https://api.openai.com/v1")
    pub base_url: Option<String>,

    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,

    pub temperature: Option<f32>,

    pub timeout_secs: Option<u64>,

    /// File whose contents replace the built-in system prompt
    pub system_prompt_path: Option<String>,

    pub fallback_response: Option<String>,
}

/// Thread memory configuration
#[derive(Debug, Default, Deserialize)]
pub struct MemoryFileConfig {
    pub max_retained: Option<usize>,
    pub injection_window: Option<usize>,
    pub ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

/// Durable mirror configuration
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    pub enabled: Option<bool>,
    pub path: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or a field has the wrong type
pub fn parse(content: &str) -> crate::Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/crediflex/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("crediflex").join("config.toml"))
}
