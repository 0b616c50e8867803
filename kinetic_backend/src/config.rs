use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachConfig {
    // Loop control
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_reflection_mode")]
    pub reflection_mode: bool,

    // Generation capability (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    // Leaving the URL unset runs without a generation capability.
    #[serde(default)]
    pub llm_api_url: Option<String>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_synthesis_timeout_secs")]
    pub synthesis_timeout_secs: u64,

    // Knowledge base
    #[serde(default = "default_exercise_catalog_path")]
    pub exercise_catalog_path: String,
}

fn default_max_iterations() -> usize {
    3
}

fn default_reflection_mode() -> bool {
    true
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_max_tokens() -> u32 {
    800
}

fn default_temperature() -> f32 {
    0.7
}

fn default_synthesis_timeout_secs() -> u64 {
    60
}

fn default_exercise_catalog_path() -> String {
    "data/exercises.json".to_string()
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            reflection_mode: default_reflection_mode(),
            llm_api_url: None,
            llm_model: default_llm_model(),
            llm_api_key: None,
            vision_model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            synthesis_timeout_secs: default_synthesis_timeout_secs(),
            exercise_catalog_path: default_exercise_catalog_path(),
        }
    }
}

impl CoachConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("kinetic_config.toml")
    }

    /// Load config from kinetic_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        Self::load_or_env(&Self::config_path())
    }

    /// Load `path` if it exists and parses; otherwise defaults plus env vars.
    pub fn load_or_env(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!("No config file found, using defaults + env vars");
            return Self::from_env();
        }

        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("{:#}", e);
                tracing::warn!("Config file {:?} is unusable, using defaults + env vars", path);
                Self::from_env()
            }
        }
    }

    /// Load config from an explicit TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config = toml::from_str::<CoachConfig>(&contents)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from defaults plus whatever `lookup` resolves.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("AGENTIC_RAG_MAX_ITERATIONS") {
            if let Ok(iterations) = value.trim().parse() {
                config.max_iterations = iterations;
            }
        }

        if let Some(value) = lookup("AGENTIC_RAG_REFLECTION_MODE") {
            config.reflection_mode = value.trim().eq_ignore_ascii_case("true");
        }

        if let Some(value) = lookup("AGENTIC_RAG_MAX_TOKENS") {
            if let Ok(tokens) = value.trim().parse() {
                config.max_tokens = tokens;
            }
        }

        if let Some(value) = lookup("AI_TEMPERATURE") {
            if let Ok(temperature) = value.trim().parse() {
                config.temperature = temperature;
            }
        }

        if let Some(url) = lookup("LLM_API_URL") {
            if !url.trim().is_empty() {
                config.llm_api_url = Some(url.trim().to_string());
            }
        }

        if let Some(model) = lookup("LLM_MODEL") {
            if !model.trim().is_empty() {
                config.llm_model = model;
            }
        }

        if let Some(key) = lookup("LLM_API_KEY") {
            config.llm_api_key = Some(key);
        }

        if let Some(model) = lookup("VISION_MODEL") {
            if !model.trim().is_empty() {
                config.vision_model = Some(model);
            }
        }

        if let Some(value) = lookup("KINETIC_SYNTHESIS_TIMEOUT_SECS") {
            if let Ok(seconds) = value.trim().parse() {
                config.synthesis_timeout_secs = seconds;
            }
        }

        if let Some(path) = lookup("KINETIC_EXERCISE_CATALOG") {
            if !path.trim().is_empty() {
                config.exercise_catalog_path = path;
            }
        }

        config
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }

    /// Model used for the image-analysis call; falls back to the main model.
    pub fn vision_model(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(&self.llm_model)
    }
}
