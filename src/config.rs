use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Generation backend settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the gateway key. "none" disables the backend.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Short timeout for ranking prompts
    #[serde(default = "default_ranking_timeout")]
    pub ranking_timeout_secs: u64,

    /// Longer timeout for integration and rewrite prompts (larger payloads)
    #[serde(default = "default_rewrite_timeout")]
    pub rewrite_timeout_secs: u64,

    /// Consume responses as SSE event streams
    #[serde(default)]
    pub stream: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            ranking_timeout_secs: default_ranking_timeout(),
            rewrite_timeout_secs: default_rewrite_timeout(),
            stream: false,
        }
    }
}

impl LlmConfig {
    pub fn ranking_timeout(&self) -> Duration {
        Duration::from_secs(self.ranking_timeout_secs)
    }

    pub fn rewrite_timeout(&self) -> Duration {
        Duration::from_secs(self.rewrite_timeout_secs)
    }

    /// API key from the configured environment variable.
    /// `None` means no backend: callers switch to deterministic fallbacks.
    pub fn api_key(&self) -> Option<String> {
        let env_var = self.api_key_env.as_deref()?;
        if env_var.eq_ignore_ascii_case("none") {
            return None;
        }
        env::var(env_var).ok().filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Scratch area holding materialized skill trees
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Where packaged `.skill` archives are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries per issue after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Directory of already-installed skills (default: ~/.claude/skills)
    #[serde(default)]
    pub installed_skills_dir: Option<PathBuf>,

    /// Refuse to package when the validator reports a failure
    #[serde(default)]
    pub require_validation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            output_dir: default_output_dir(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            installed_skills_dir: None,
            require_validation: false,
        }
    }
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn installed_skills_dir(&self) -> Option<PathBuf> {
        self.installed_skills_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".claude").join("skills")))
    }
}

/// Where candidate templates are fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_repo_url")]
    pub repo_url: String,

    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repo_url: default_repo_url(),
            clone_timeout_secs: default_clone_timeout(),
        }
    }
}

impl SourceConfig {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Optional TOML catalog replacing the built-in one
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("AI_GATEWAY_API_KEY".to_string())
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_temperature() -> f32 {
    0.3
}

fn default_ranking_timeout() -> u64 {
    30
}

fn default_rewrite_timeout() -> u64 {
    90
}

fn default_workspace() -> PathBuf {
    PathBuf::from("./workspace")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./outputs")
}

fn default_batch_size() -> usize {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_repo_url() -> String {
    "https://github.com/anthropics/skills.git".to_string()
}

fn default_clone_timeout() -> u64 {
    60
}

impl Config {
    /// Load configuration from a specific path, or use default search paths
    pub fn load_with_path(path: Option<String>) -> Result<Self> {
        if let Some(config_path) = path {
            debug!("Loading config from explicit path: {}", config_path);
            return Self::load_from_path(&config_path);
        }

        // Per-project config first
        if let Ok(config) = Self::load_from_path("skillforge.toml") {
            debug!("Loaded config from ./skillforge.toml");
            return Ok(config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("skillforge").join("config.toml");
            if let Ok(config) = Self::load_from_path(&config_path) {
                debug!("Loaded config from {:?}", config_path);
                return Ok(config);
            }
        }

        debug!("Using default config");
        Ok(Self::default())
    }

    fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.batch_size, 5);
        assert_eq!(config.pipeline.max_retries, 2);
        assert_eq!(config.pipeline.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.llm.api_key_env.as_deref(), Some("AI_GATEWAY_API_KEY"));
        assert!(config.llm.rewrite_timeout() > config.llm.ranking_timeout());
        assert!(!config.pipeline.require_validation);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[pipeline]
batch_size = 10

[llm]
model = "gpt-4o"
"#,
        )
        .unwrap();
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.max_retries, 2);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.rewrite_timeout_secs, 90);
        assert_eq!(
            config.source.repo_url,
            "https://github.com/anthropics/skills.git"
        );
    }

    #[test]
    fn test_load_explicit_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("skillforge.toml");
        fs::write(&path, "[pipeline]\nrequire_validation = true\n").unwrap();
        let config = Config::load_with_path(Some(path.to_string_lossy().to_string())).unwrap();
        assert!(config.pipeline.require_validation);
    }

    #[test]
    fn test_load_explicit_missing_path_fails() {
        let result = Config::load_with_path(Some("/nonexistent/skillforge.toml".to_string()));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_api_key_from_env() {
        env::set_var("SKILLFORGE_TEST_KEY", "secret-123");
        let mut llm = LlmConfig::default();
        llm.api_key_env = Some("SKILLFORGE_TEST_KEY".to_string());
        assert_eq!(llm.api_key().as_deref(), Some("secret-123"));
        env::remove_var("SKILLFORGE_TEST_KEY");
        assert!(llm.api_key().is_none());
    }

    #[test]
    #[serial]
    fn test_api_key_blank_or_none_disables_backend() {
        env::set_var("SKILLFORGE_TEST_BLANK_KEY", "  ");
        let mut llm = LlmConfig::default();
        llm.api_key_env = Some("SKILLFORGE_TEST_BLANK_KEY".to_string());
        assert!(llm.api_key().is_none());
        env::remove_var("SKILLFORGE_TEST_BLANK_KEY");

        llm.api_key_env = Some("none".to_string());
        assert!(llm.api_key().is_none());

        llm.api_key_env = None;
        assert!(llm.api_key().is_none());
    }

    #[test]
    fn test_installed_skills_dir_override() {
        let mut pipeline = PipelineConfig::default();
        pipeline.installed_skills_dir = Some(PathBuf::from("/opt/skills"));
        assert_eq!(
            pipeline.installed_skills_dir(),
            Some(PathBuf::from("/opt/skills"))
        );
    }
}
