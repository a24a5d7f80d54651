//! Application configuration for cogreader.
//!
//! User config lives at `~/.cogreader/cogreader.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "cogreader.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".cogreader";

/// Upper bound on passes per run.
pub const MAX_PASSES: u32 = 16;

// ---------------------------------------------------------------------------
// Config structs (matching cogreader.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Reading engine settings.
    #[serde(default)]
    pub reading: ReadingConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Summary cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory that receives one sub-directory per run.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "cogreader-out".into()
}

/// `[reading]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingConfig {
    /// Number of full sequential passes.
    #[serde(default = "default_num_passes")]
    pub num_passes: u32,

    /// Use enriched context (prior-pass summary + glossary) from pass 2 on.
    #[serde(default = "default_true")]
    pub enriched_context: bool,

    /// Inject a glossary prefix into enriched context.
    #[serde(default = "default_true")]
    pub inject_glossary: bool,

    /// Glossary entries injected per section (K).
    #[serde(default = "default_glossary_limit")]
    pub glossary_limit: usize,

    /// Nearest ancestors kept in context; deeper chains are truncated at the root end.
    #[serde(default = "default_max_ancestors")]
    pub max_ancestors: usize,

    /// Maximum key concepts retained per summary.
    #[serde(default = "default_max_key_concepts")]
    pub max_key_concepts: usize,

    /// Source text is truncated to this many characters before prompting.
    #[serde(default = "default_max_source_chars")]
    pub max_source_chars: usize,

    /// Use the offline extractive summarizer instead of a model.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            num_passes: default_num_passes(),
            enriched_context: true,
            inject_glossary: true,
            glossary_limit: default_glossary_limit(),
            max_ancestors: default_max_ancestors(),
            max_key_concepts: default_max_key_concepts(),
            max_source_chars: default_max_source_chars(),
            dry_run: false,
        }
    }
}

impl ReadingConfig {
    /// Reject pass counts and mode combinations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.num_passes == 0 {
            return Err(ReaderError::config("num_passes must be at least 1"));
        }
        if self.num_passes > MAX_PASSES {
            return Err(ReaderError::config(format!(
                "num_passes {} exceeds the maximum of {MAX_PASSES}",
                self.num_passes
            )));
        }
        if self.max_ancestors == 0 {
            return Err(ReaderError::config(
                "max_ancestors must be at least 1 (cumulative context needs the parent)",
            ));
        }
        if self.max_key_concepts == 0 {
            return Err(ReaderError::config("max_key_concepts must be at least 1"));
        }
        if self.max_source_chars == 0 {
            return Err(ReaderError::config("max_source_chars must be at least 1"));
        }
        if self.inject_glossary && self.glossary_limit == 0 {
            return Err(ReaderError::config(
                "glossary_limit must be positive when inject_glossary is enabled",
            ));
        }
        if self.inject_glossary && !self.enriched_context && self.num_passes > 1 {
            return Err(ReaderError::config(
                "inject_glossary requires enriched_context (glossary is only injected in enriched mode)",
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_num_passes() -> u32 {
    2
}
fn default_glossary_limit() -> usize {
    10
}
fn default_max_ancestors() -> usize {
    8
}
fn default_max_key_concepts() -> usize {
    5
}
fn default_max_source_chars() -> usize {
    12_000
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model to use for summarization.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API base URL (OpenAI-compatible).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient failures (network, 429, 5xx).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1/".into()
}
fn default_timeout_secs() -> u64 {
    90
}
fn default_max_retries() -> u32 {
    3
}
fn default_temperature() -> f32 {
    0.2
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Reuse summarizer responses for identical prompts.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database path; defaults to `~/.cogreader/cache.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl CacheConfig {
    /// Resolve the cache database location.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(config_dir()?.join("cache.db")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.cogreader/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ReaderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.cogreader/cogreader.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| ReaderError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ReaderError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ReaderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ReaderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ReaderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ReaderError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable, \
             or pass --dry-run to use the offline summarizer."
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
        assert!(toml_str.contains("num_passes"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.reading, ReadingConfig::default());
        assert_eq!(parsed.openrouter.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn partial_reading_section_fills_defaults() {
        let toml_str = r#"
[reading]
num_passes = 3
inject_glossary = false
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.reading.num_passes, 3);
        assert!(!config.reading.inject_glossary);
        assert_eq!(config.reading.glossary_limit, 10);
        assert_eq!(config.reading.max_key_concepts, 5);
        assert!(config.cache.enabled);
    }

    #[test]
    fn reading_config_validation() {
        assert!(ReadingConfig::default().validate().is_ok());

        let zero = ReadingConfig {
            num_passes: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(ReaderError::Config { .. })));

        let too_many = ReadingConfig {
            num_passes: MAX_PASSES + 1,
            ..Default::default()
        };
        assert!(too_many.validate().is_err());

        let no_k = ReadingConfig {
            glossary_limit: 0,
            ..Default::default()
        };
        assert!(no_k.validate().is_err());

        let no_source = ReadingConfig {
            max_source_chars: 0,
            ..Default::default()
        };
        let err = no_source.validate().unwrap_err();
        assert!(matches!(err, ReaderError::Config { .. }));
        assert!(err.to_string().contains("max_source_chars"));

        let glossary_without_enrichment = ReadingConfig {
            enriched_context: false,
            num_passes: 2,
            ..Default::default()
        };
        let err = glossary_without_enrichment.validate().unwrap_err();
        assert!(err.to_string().contains("enriched_context"));

        let single_pass_cumulative = ReadingConfig {
            enriched_context: false,
            num_passes: 1,
            ..Default::default()
        };
        assert!(single_pass_cumulative.validate().is_ok());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "COGREADER_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
