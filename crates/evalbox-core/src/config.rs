use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{EvalboxError, Result};

pub const ENV_API_BASE: &str = "EVALBOX_API_BASE";
pub const ENV_API_KEY: &str = "EVALBOX_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_PYTHON: &str = "EVALBOX_PYTHON";
pub const ENV_NODE: &str = "EVALBOX_NODE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalboxConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub evaluator: HarnessConfig,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    100
}

impl Default for EvalboxConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            evaluator: HarnessConfig::default(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl EvalboxConfig {
    /// Load a config file. The format is picked from the extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let config: EvalboxConfig = match ext.as_deref() {
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => {
                return Err(EvalboxError::Config(format!(
                    "unsupported config format: {} (expected .json, .yaml or .yml)",
                    path.display()
                )))
            }
        };

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(base) = non_empty(ENV_API_BASE) {
            self.llm.api_base = base;
        }
        if let Some(key) = non_empty(ENV_API_KEY).or_else(|| non_empty(ENV_OPENAI_API_KEY)) {
            self.llm.api_key = key;
        }
        if let Some(python) = non_empty(ENV_PYTHON) {
            self.evaluator.python = python;
        }
        if let Some(node) = non_empty(ENV_NODE) {
            self.evaluator.node = node;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.trim().is_empty() {
            return Err(EvalboxError::Config("llm.api_base is empty".to_string()));
        }
        if self.llm.models.is_empty() {
            return Err(EvalboxError::Config("llm.models is empty".to_string()));
        }
        if let Some(m) = self.llm.models.iter().find(|m| m.name.trim().is_empty()) {
            return Err(EvalboxError::Config(format!(
                "llm.models contains an entry without a name (weight {})",
                m.weight
            )));
        }
        self.evaluator.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub models: Vec<ModelEntry>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8765/v1".to_string(),
            api_key: "dummy-key".to_string(),
            models: vec![ModelEntry::default()],
            temperature: 0.7,
            max_tokens: 100,
            request_timeout_secs: 10,
        }
    }
}

impl LlmConfig {
    /// First configured model, used when no model is named explicitly.
    pub fn primary_model(&self) -> Option<&str> {
        self.models.first().map(|m| m.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

impl Default for ModelEntry {
    fn default() -> Self {
        Self {
            name: "gemini-2.0-flash-lite".to_string(),
            weight: default_weight(),
        }
    }
}

/// Settings for the evaluation harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Python interpreter used for `.py` candidates
    pub python: String,
    /// Node.js binary used for `.js`/`.cjs` candidates
    pub node: String,
    /// Name of the entry operation invoked on the candidate
    pub entry: String,
    /// Per-stream cap on captured stdout/stderr
    pub output_limit_bytes: usize,
    /// Address-space cap applied to the candidate process
    pub memory_limit_mb: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            node: "node".to_string(),
            entry: "run".to_string(),
            output_limit_bytes: 64 * 1024,
            memory_limit_mb: None,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        let entry = self.entry.trim();
        if entry.is_empty() {
            return Err(EvalboxError::Config("evaluator.entry is empty".to_string()));
        }
        if !entry.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            return Err(EvalboxError::Config(format!(
                "evaluator.entry is not a valid identifier: {entry}"
            )));
        }
        if self.output_limit_bytes == 0 {
            return Err(EvalboxError::Config(
                "evaluator.output_limit_bytes must be positive".to_string(),
            ));
        }
        if self.memory_limit_mb == Some(0) {
            return Err(EvalboxError::Config(
                "evaluator.memory_limit_mb must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
