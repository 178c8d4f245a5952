use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Result, SheetscanError};

pub const DEFAULT_BATCH_SIZE: usize = 5;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_path_or(var: &str, default: &str) -> PathBuf {
    env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding one subdirectory per project.
    pub root_dir: PathBuf,
    /// Directory holding one `{project_id}.json` state file per project.
    pub state_dir: PathBuf,
    /// Directory receiving `{project_id}.csv` and `{project_id}.jsonl`.
    pub export_dir: PathBuf,
    pub batch_size: usize,
    pub vision: VisionConfig,
}

/// Settings for the OpenAI-compatible multimodal extraction service
#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
    // Longest image side sent to the service; 0 sends images untouched
    pub max_image_dimension: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o".to_string(),
            api_key: None,
            base_url: None,
            timeout_secs: 120,
            max_retries: 3,
            max_tokens: 4096,
            max_image_dimension: 2048,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: env_path_or("SHEETSCAN_ROOT", "projects"),
            state_dir: env_path_or("SHEETSCAN_STATE_DIR", "state"),
            export_dir: env_path_or("SHEETSCAN_EXPORT_DIR", "exports"),
            batch_size: parse_env_or("SHEETSCAN_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            vision: VisionConfig {
                model: env::var("VISION_MODEL").unwrap_or_else(|_| "openai/gpt-4o".to_string()),
                api_key: env::var("VISION_API_KEY")
                    .or_else(|_| env::var("OPENAI_API_KEY"))
                    .ok()
                    .filter(|key| !key.trim().is_empty()),
                base_url: env::var("VISION_BASE_URL").ok(),
                timeout_secs: parse_env_or("VISION_TIMEOUT", 120),
                max_retries: parse_env_or("VISION_MAX_RETRIES", 3),
                max_tokens: parse_env_or("VISION_MAX_TOKENS", 4096),
                max_image_dimension: parse_env_or("VISION_MAX_DIMENSION", 2048),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Checks everything an extraction run needs before any project is touched.
    pub fn validate_for_extraction(&self) -> Result<()> {
        self.validate_batch_size()?;
        require_dir(&self.root_dir, "project root")?;

        let (provider, _) = parse_vision_provider_model(&self.vision.model);
        if provider_requires_api_key(provider) && self.vision.api_key.is_none() {
            return Err(SheetscanError::Config(format!(
                "VISION_API_KEY is required for vision model '{}'",
                self.vision.model
            )));
        }
        if provider_requires_base_url(provider) && self.vision.base_url.is_none() {
            return Err(SheetscanError::Config(format!(
                "VISION_BASE_URL is required for vision model '{}' without a provider prefix",
                self.vision.model
            )));
        }

        Ok(())
    }

    /// Export only reads state, so credentials and the image root are not needed.
    pub fn validate_for_export(&self) -> Result<()> {
        require_dir(&self.state_dir, "state")
    }

    pub fn validate_for_status(&self) -> Result<()> {
        require_dir(&self.root_dir, "project root")
    }

    fn validate_batch_size(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SheetscanError::Config(
                "Batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_dir(path: &Path, label: &str) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(SheetscanError::Config(format!(
            "{label} directory {} does not exist",
            path.display()
        )))
    }
}

/// Known vision providers that speak the OpenAI chat-completions protocol
pub const KNOWN_VISION_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Parse a vision model name into (provider, model) tuple.
pub fn parse_vision_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_VISION_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    ("local", model)
}

pub fn provider_requires_api_key(provider: &str) -> bool {
    !matches!(
        provider.to_lowercase().as_str(),
        "ollama" | "local" | "lmstudio"
    )
}

/// An unprefixed model has no default endpoint to talk to.
pub fn provider_requires_base_url(provider: &str) -> bool {
    provider.eq_ignore_ascii_case("local")
}
