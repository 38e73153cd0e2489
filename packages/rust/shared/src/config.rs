//! Application configuration for table-enrich.
//!
//! User config lives at `~/.table-enrich/table-enrich.toml`.
//! Job-file values and CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnrichError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "table-enrich.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".table-enrich";

// ---------------------------------------------------------------------------
// Config structs (matching table-enrich.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Gemini API settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Retry/backoff policy for model calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Model used when a job does not name one.
    #[serde(default = "default_model")]
    pub model: String,

    /// Rows per checkpointed batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum rows processed concurrently within a batch.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Value written into schema columns of rows whose enrichment failed.
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            failure_marker: default_failure_marker(),
        }
    }
}

fn default_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_batch_size() -> usize {
    10
}
fn default_max_workers() -> usize {
    4
}
fn default_failure_marker() -> String {
    "#FAILED".into()
}

/// `[gemini]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// REST endpoint root.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-call timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_request_timeout() -> u64 {
    120
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per model call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay() -> u64 {
    2_000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_backoff_factor() -> u32 {
    2
}

impl RetryConfig {
    /// Backoff to wait after the `failed_attempt`-th failure (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1);
        let factor = u64::from(self.backoff_factor.max(1)).saturating_pow(exp);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.table-enrich/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| EnrichError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.table-enrich/table-enrich.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EnrichError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EnrichError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EnrichError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EnrichError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EnrichError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the Gemini API key from the environment.
///
/// A missing or empty variable is a fatal configuration error.
pub fn read_api_key(config: &GeminiConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(EnrichError::config(format!(
            "API key not found. Please set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("batch_size"));
        assert!(toml_str.contains("GOOGLE_API_KEY"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
batch_size = 25

[retry]
max_attempts = 3
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.batch_size, 25);
        assert_eq!(config.defaults.max_workers, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 2_000);
        assert_eq!(config.gemini.api_key_env, "GOOGLE_API_KEY");
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table-enrich.toml");
        std::fs::write(&path, "[defaults]\nmodel = \"gemini-pro\"\n").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.defaults.model, "gemini-pro");

        std::fs::write(&path, "[defaults\n").unwrap();
        assert!(load_config_from(&path).is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 6,
            initial_delay_ms: 100,
            max_delay_ms: 500,
            backoff_factor: 2,
        };
        assert_eq!(retry.delay_after(1), Duration::from_millis(100));
        assert_eq!(retry.delay_after(2), Duration::from_millis(200));
        assert_eq!(retry.delay_after(3), Duration::from_millis(400));
        assert_eq!(retry.delay_after(4), Duration::from_millis(500));
        assert_eq!(retry.delay_after(40), Duration::from_millis(500));
    }

    #[test]
    fn api_key_missing_is_config_error() {
        let config = GeminiConfig {
            // Unique name so parallel tests never see it set.
            api_key_env: "TE_TEST_NONEXISTENT_KEY_12345".into(),
            ..GeminiConfig::default()
        };
        let err = read_api_key(&config).unwrap_err();
        assert!(matches!(err, EnrichError::Config { .. }));
        assert!(err.to_string().contains("API key not found"));
    }
}
