//! Per-action minimum confidence thresholds, with persisted overrides.
//!
//! Grounded on the teacher's `config.rs` env-var-resolution idiom (defaults
//! seeded once, overridable by name) and on `persistence::traits` for the
//! storage-backed override layer. Mirrors spec.md §4.2 exactly: seed on
//! construction without clobbering existing values, read through storage on
//! every call rather than caching overrides.

use crate::storage::Storage;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

const CONFIG_PREFIX: &str = "confidence.threshold.";

fn config_key(action: &str) -> String {
    format!("{CONFIG_PREFIX}{action}")
}

fn default_threshold(action: &str) -> f64 {
    match action {
        "click" => 0.5,
        "type" => 0.7,
        "hover" => 0.7,
        "verify" => 0.7,
        _ => 0.6,
    }
}

const DEFAULT_ACTIONS: [&str; 5] = ["click", "type", "hover", "verify", "default"];

/// Reads `CONFIDENCE_THRESHOLD_<UPPER>`-style configuration entries,
/// falling back to built-in defaults on any storage failure.
pub struct ConfidenceThresholdService {
    storage: Arc<dyn Storage>,
}

impl ConfidenceThresholdService {
    /// Seed default thresholds into storage, skipping any key that already
    /// has a value there.
    pub async fn new(storage: Arc<dyn Storage>) -> Self {
        let service = Self { storage };
        service.seed_defaults().await;
        service
    }

    async fn seed_defaults(&self) {
        for action in DEFAULT_ACTIONS {
            let key = config_key(action);
            match self.storage.config_get(&key).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    if let Err(e) = self
                        .storage
                        .config_set(&key, serde_json::json!(default_threshold(action)), None)
                        .await
                    {
                        warn!(action, error = %e, "failed to seed default confidence threshold");
                    }
                }
                Err(e) => {
                    warn!(action, error = %e, "failed to read confidence threshold during seeding");
                }
            }
        }
    }

    /// Threshold for `action`: stored numeric override if present, else the
    /// built-in default for that action, else the built-in `default`.
    pub async fn get_threshold(&self, action: &str) -> f64 {
        match self.storage.config_get(&config_key(action)).await {
            Ok(Some(entry)) => entry.value.as_f64().unwrap_or_else(|| default_threshold(action)),
            Ok(None) => default_threshold(action),
            Err(e) => {
                warn!(action, error = %e, "storage failure reading confidence threshold, using default");
                default_threshold(action)
            }
        }
    }

    /// All thresholds under `confidence.threshold.`, merged with in-memory
    /// defaults for any action not yet persisted.
    pub async fn get_all_thresholds(&self) -> BTreeMap<String, f64> {
        let mut out: BTreeMap<String, f64> = DEFAULT_ACTIONS
            .iter()
            .map(|a| (a.to_string(), default_threshold(a)))
            .collect();

        match self.storage.config_get_all(CONFIG_PREFIX).await {
            Ok(entries) => {
                for entry in entries {
                    if let Some(action) = entry.key.strip_prefix(CONFIG_PREFIX) {
                        if let Some(value) = entry.value.as_f64() {
                            out.insert(action.to_string(), value);
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "storage failure reading all confidence thresholds, using defaults"),
        }

        out
    }

    /// Set a threshold override for `action`. Caller validates `[0, 1]`
    /// before calling (see spec.md §7 `ValidationError`).
    pub async fn set_threshold(&self, action: &str, value: f64) -> Result<(), crate::storage::StorageError> {
        self.storage
            .config_set(&config_key(action), serde_json::json!(value), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    #[tokio::test]
    async fn seeds_defaults_without_overwriting_existing() {
        let storage = InMemoryStorage::shared();
        storage
            .config_set("confidence.threshold.click", serde_json::json!(0.9), None)
            .await
            .unwrap();

        let service = ConfidenceThresholdService::new(storage.clone()).await;

        assert_eq!(service.get_threshold("click").await, 0.9);
        assert_eq!(service.get_threshold("type").await, 0.7);
    }

    #[tokio::test]
    async fn unknown_action_falls_back_to_default() {
        let storage = InMemoryStorage::shared();
        let service = ConfidenceThresholdService::new(storage).await;
        assert_eq!(service.get_threshold("scroll").await, 0.6);
    }

    #[tokio::test]
    async fn get_all_thresholds_merges_overrides_with_defaults() {
        let storage = InMemoryStorage::shared();
        let service = ConfidenceThresholdService::new(storage).await;
        service.set_threshold("hover", 0.95).await.unwrap();

        let all = service.get_all_thresholds().await;
        assert_eq!(all["hover"], 0.95);
        assert_eq!(all["click"], 0.5);
    }

    #[tokio::test]
    async fn non_numeric_stored_value_falls_back_to_default() {
        let storage = InMemoryStorage::shared();
        storage
            .config_set("confidence.threshold.click", serde_json::json!("not-a-number"), None)
            .await
            .unwrap();
        let service = ConfidenceThresholdService::new(storage).await;
        assert_eq!(service.get_threshold("click").await, 0.5);
    }
}
