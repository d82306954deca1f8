//! `Config`, spec.md §6: resolves the recognized configuration keys from
//! environment variables, with an optional Storage-backed override layer
//! checked first. Grounded on the teacher's `config.rs` `${VAR}`/`$VAR`
//! environment-variable substitution idiom (`resolve_env_var`).

use crate::storage::Storage;
use std::sync::Arc;

/// Recognized configuration keys, spec.md §6.
pub const LLM_PROVIDER: &str = "LLM_PROVIDER";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const OPENAI_VISION_MODEL: &str = "OPENAI_VISION_MODEL";
pub const OPENAI_PLANNER_MODEL: &str = "OPENAI_PLANNER_MODEL";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ANTHROPIC_MODEL: &str = "ANTHROPIC_MODEL";
pub const ANTHROPIC_VISION_MODEL: &str = "ANTHROPIC_VISION_MODEL";
pub const ANTHROPIC_PLANNER_MODEL: &str = "ANTHROPIC_PLANNER_MODEL";
pub const ANTHROPIC_BEDROCK_BASE_URL: &str = "ANTHROPIC_BEDROCK_BASE_URL";
pub const ANTHROPIC_AUTH_TOKEN: &str = "ANTHROPIC_AUTH_TOKEN";
pub const STORAGE_TYPE: &str = "STORAGE_TYPE";
pub const REDIS_URL: &str = "REDIS_URL";
pub const MAX_RETRIES: &str = "MAX_RETRIES";
pub const PROACTIVE_REFINEMENT: &str = "PROACTIVE_REFINEMENT";
pub const LOG_LEVEL: &str = "LOG_LEVEL";

/// Resolves recognized configuration keys (spec.md §6) from, in priority
/// order: a Storage-backed override, the process environment, then a
/// caller-supplied default. Values may use `${VAR}`/`$VAR` to indirect
/// through another environment variable, same as the teacher's agent
/// config loader.
pub struct Config {
    storage: Option<Arc<dyn Storage>>,
}

impl Config {
    pub fn new() -> Self {
        Self { storage: None }
    }

    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        Self { storage: Some(storage) }
    }

    /// Resolve `key`, falling back to `default` if no override or
    /// environment value is present.
    pub async fn get(&self, key: &str, default: Option<&str>) -> Option<String> {
        if let Some(storage) = &self.storage {
            if let Ok(Some(entry)) = storage.config_get(key).await {
                if let Some(raw) = entry.value.as_str() {
                    return Some(resolve_env_var(raw));
                }
            }
        }
        match std::env::var(key) {
            Ok(raw) => Some(resolve_env_var(&raw)),
            Err(_) => default.map(str::to_string),
        }
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key, None).await {
            Some(raw) => matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes"),
            None => default,
        }
    }

    pub async fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key, None).await.and_then(|raw| raw.parse().ok()).unwrap_or(default)
    }

    /// `openai` or `anthropic`, spec.md §6; defaults to `openai`.
    pub async fn llm_provider(&self) -> String {
        self.get(LLM_PROVIDER, Some("openai")).await.unwrap_or_else(|| "openai".to_string())
    }

    pub async fn max_retries(&self) -> u32 {
        self.get_u32(MAX_RETRIES, 3).await
    }

    pub async fn proactive_refinement_enabled(&self) -> bool {
        self.get_bool(PROACTIVE_REFINEMENT, true).await
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `${VAR_NAME}` or `$VAR_NAME` against the process environment,
/// leaving plain values untouched.
fn resolve_env_var(value: &str) -> String {
    let trimmed = value.trim();

    if let Some(inner) = trimmed.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        return std::env::var(inner).unwrap_or_default();
    }
    if let Some(name) = trimmed.strip_prefix('$') {
        if !name.contains('{') {
            return std::env::var(name).unwrap_or_default();
        }
    }
    trimmed.to_string()
}
