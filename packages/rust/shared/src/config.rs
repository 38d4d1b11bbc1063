//! Application configuration for Vignette.
//!
//! User config lives at `~/.vignette/vignette.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, VignetteError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "vignette.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".vignette";

/// Longest lookback window the pipeline accepts, in days.
pub const MAX_LOOKBACK_DAYS: u32 = 3_650;

// ---------------------------------------------------------------------------
// Config structs (matching vignette.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline shape: lookback, enrichment fan-out, caching.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Attempt ceilings and backoff delays.
    #[serde(default)]
    pub retries: RetrySettings,

    /// Per-call timeouts.
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// AI-model provider settings.
    #[serde(default)]
    pub model: ModelProviderConfig,

    /// Search provider settings.
    #[serde(default)]
    pub search: SearchProviderConfig,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Days of history, counted back from the newest interaction.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Number of top-ranked patterns sent to enrichment.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Enrichment cache time-to-live.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Optional ceiling on a whole enrichment round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_batch_timeout_secs: Option<u64>,

    /// Optional ceiling on a whole fabrication round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fabrication_batch_timeout_secs: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            top_k: default_top_k(),
            cache_ttl_secs: default_cache_ttl_secs(),
            enrichment_batch_timeout_secs: None,
            fabrication_batch_timeout_secs: None,
        }
    }
}

fn default_lookback_days() -> u32 {
    30
}
fn default_top_k() -> usize {
    3
}
fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

/// `[retries]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_three")]
    pub patterns: u32,
    #[serde(default = "default_three")]
    pub theme: u32,
    #[serde(default = "default_two")]
    pub enrichment: u32,
    #[serde(default = "default_three")]
    pub fabrication: u32,
    /// Delay before the first retry; doubles on each further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            patterns: default_three(),
            theme: default_three(),
            enrichment: default_two(),
            fabrication: default_three(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_three() -> u32 {
    3
}
fn default_two() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    4_000
}

/// `[timeouts]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_model_call_secs")]
    pub model_call_secs: u64,
    #[serde(default = "default_search_call_secs")]
    pub search_call_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            model_call_secs: default_model_call_secs(),
            search_call_secs: default_search_call_secs(),
        }
    }
}

fn default_model_call_secs() -> u64 {
    60
}
fn default_search_call_secs() -> u64 {
    30
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProviderConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_model_key_env")]
    pub api_key_env: String,

    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    /// Model used for every structured call.
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for ModelProviderConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_model_key_env(),
            base_url: default_model_base_url(),
            default_model: default_model(),
        }
    }
}

fn default_model_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProviderConfig {
    /// Env var holding the search API key. The key is optional.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Endpoint accepting `{"query": ...}` and answering `{answer, citations}`.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
}

impl Default for SearchProviderConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            endpoint: default_search_endpoint(),
        }
    }
}

fn default_search_key_env() -> String {
    "VIGNETTE_SEARCH_API_KEY".into()
}
fn default_search_endpoint() -> String {
    "http://localhost:8787/search".into()
}

// ---------------------------------------------------------------------------
// Runtime config (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Attempt ceiling and delays for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Each attempt is abandoned after this long.
    pub call_timeout: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Runtime pipeline configuration: config file + CLI overrides.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub lookback_days: u32,
    pub top_k: usize,
    pub cache_ttl: Duration,
    pub patterns_retry: RetryPolicy,
    pub theme_retry: RetryPolicy,
    pub enrichment_retry: RetryPolicy,
    pub fabrication_retry: RetryPolicy,
    pub enrichment_batch_timeout: Option<Duration>,
    pub fabrication_batch_timeout: Option<Duration>,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let r = &config.retries;
        let policy = |attempts: u32, timeout_secs: u64| RetryPolicy {
            max_attempts: attempts.max(1),
            base_delay: Duration::from_millis(r.base_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms.max(r.base_delay_ms)),
            call_timeout: Duration::from_secs(timeout_secs),
        };
        let model_secs = config.timeouts.model_call_secs;
        let search_secs = config.timeouts.search_call_secs;

        Self {
            lookback_days: config.pipeline.lookback_days,
            top_k: config.pipeline.top_k,
            cache_ttl: Duration::from_secs(config.pipeline.cache_ttl_secs),
            patterns_retry: policy(r.patterns, model_secs),
            theme_retry: policy(r.theme, model_secs),
            enrichment_retry: policy(r.enrichment, search_secs),
            fabrication_retry: policy(r.fabrication, model_secs),
            enrichment_batch_timeout: config
                .pipeline
                .enrichment_batch_timeout_secs
                .map(Duration::from_secs),
            fabrication_batch_timeout: config
                .pipeline
                .fabrication_batch_timeout_secs
                .map(Duration::from_secs),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.vignette/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| VignetteError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.vignette/vignette.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| VignetteError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        VignetteError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| VignetteError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| VignetteError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| VignetteError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject settings the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.pipeline.top_k == 0 {
        return Err(VignetteError::config("pipeline.top_k must be at least 1"));
    }
    if config.pipeline.cache_ttl_secs == 0 {
        return Err(VignetteError::config(
            "pipeline.cache_ttl_secs must be at least 1",
        ));
    }
    if config.pipeline.lookback_days > MAX_LOOKBACK_DAYS {
        return Err(VignetteError::config(format!(
            "pipeline.lookback_days must be at most {MAX_LOOKBACK_DAYS}"
        )));
    }
    for (name, secs) in [
        ("timeouts.model_call_secs", config.timeouts.model_call_secs),
        ("timeouts.search_call_secs", config.timeouts.search_call_secs),
    ] {
        if secs == 0 {
            return Err(VignetteError::config(format!("{name} must be at least 1")));
        }
    }
    for (name, url) in [
        ("model.base_url", &config.model.base_url),
        ("search.endpoint", &config.search.endpoint),
    ] {
        Url::parse(url).map_err(|e| VignetteError::config(format!("{name} {url:?}: {e}")))?;
    }
    Ok(())
}

/// Check that the model API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.model.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(VignetteError::config(format!(
            "model API key not found. Set the {var_name} environment variable."
        ))),
    }
}
