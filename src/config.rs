use dotenv::dotenv;
use std::env;
use std::path::PathBuf;

use crate::api_connection::endpoints::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::api_connection::Provider;

pub const BASE_URL_VAR: &str = "URL";
pub const DEFAULT_API_KEY_VAR: &str = "KEY";
pub const MODEL_VAR: &str = "MEALMATCH_MODEL";
pub const DATA_DIR_VAR: &str = "MEALMATCH_DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "./data";

pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_MAX_INTERNAL_ITERATION: usize = 5;
pub const EVALUATION_TEMPERATURE: f32 = 0.0;

/// Per-agent generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: f32,
    /// Upper bound on tool-resolution rounds within one turn.
    pub max_internal_iteration: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_internal_iteration: DEFAULT_MAX_INTERNAL_ITERATION,
        }
    }
}

/// Process-wide settings read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base_url: String,
    /// Name of the variable holding the API key, not the key itself.
    pub api_key_env: String,
    pub model: String,
    pub data_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            base_url: non_empty(BASE_URL_VAR).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key_env: DEFAULT_API_KEY_VAR.to_string(),
            model: non_empty(MODEL_VAR).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            data_dir: non_empty(DATA_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
        }
    }

    pub fn provider(&self) -> Provider {
        Provider::openai_compatible(&self.base_url, &self.api_key_env)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("chromadb")
    }

    pub fn substitutions_path(&self) -> PathBuf {
        self.data_dir.join("substitutions.json")
    }

    pub fn scraped_links_dir(&self) -> PathBuf {
        self.data_dir.join("scraped_links")
    }

    pub fn scraped_json_dir(&self) -> PathBuf {
        self.data_dir.join("scraped_json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let vars: HashMap<&str, &str> = [(MODEL_VAR, "  ")].into_iter().collect();
        let settings = Settings::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.api_key_env, "KEY");
        assert_eq!(settings.store_dir(), PathBuf::from("./data/chromadb"));
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            (BASE_URL_VAR, "http://localhost:8000/v1"),
            (MODEL_VAR, "my-model"),
            (DATA_DIR_VAR, "/tmp/mm"),
        ]
        .into_iter()
        .collect();
        let settings = Settings::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(settings.model, "my-model");
        assert_eq!(settings.substitutions_path(), PathBuf::from("/tmp/mm/substitutions.json"));
        assert_eq!(
            settings.provider().completions_url(),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn agent_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.max_internal_iteration, 5);
    }
}
