//! The `BrowserSession` capability: the orchestrator's only way to touch a
//! real browser. Concrete drivers are out of scope for this crate (spec.md
//! §1); this module defines the trait boundary plus an in-process mock used
//! by the crate's own tests, grounded on the teacher's pattern of defining a
//! capability trait in the module that consumes it and shipping a `Mock*`
//! implementation alongside (see `llm/retry.rs::MockProvider`).

use crate::model::{Action, Snapshot, SnapshotMetadata, StepStatus};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    #[error("selector not found: {0}")]
    SelectorNotFound(String),
    #[error("target closed")]
    TargetClosed,
    #[error("action not supported: {0}")]
    Unsupported(String),
    #[error("browser error: {0}")]
    Other(String),
}

/// Outcome of one attempt at executing an [`Action`], before verification.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub status: StepStatus,
    pub snapshot: Snapshot,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn success(metadata: SnapshotMetadata) -> Self {
        Self {
            status: StepStatus::Success,
            snapshot: Snapshot::now(metadata),
            error: None,
        }
    }

    pub fn failure(metadata: SnapshotMetadata, error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failure,
            snapshot: Snapshot::now(metadata),
            error: Some(error.into()),
        }
    }
}

/// Result of validating a CSS selector against the live page, per spec.md §4.5.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorValidation {
    pub exists: bool,
    pub is_unique: bool,
    pub is_visible: bool,
    pub count: usize,
}

/// A live, exclusively-owned connection to one browser page/tab.
///
/// Exclusively owned by one `AdaptiveOrchestrator` run for its lifetime
/// (spec.md §5); released on every exit path via `close`.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn current_url(&self) -> String;

    /// Serialized HTML of the current page, used by `DOMExtractor`.
    async fn html(&self) -> String;

    /// JPEG screenshot, base64-encoded, or `None` if capture failed.
    async fn screenshot_base64(&self, quality: u8) -> Option<String>;

    async fn query_selector_count(&self, selector: &str) -> usize;
    async fn is_visible(&self, selector: &str) -> bool;

    /// Wait for the network-idle condition, bounded by `timeout`.
    /// Timeouts are swallowed (spec.md §5) — returns `false` rather than
    /// erroring.
    async fn wait_for_networkidle(&self, timeout: Duration) -> bool;

    /// Execute one [`Action`] and report its raw, pre-verification outcome.
    async fn execute(&self, action: &Action) -> Result<ActionOutcome, ExecutorError>;

    /// Release all resources held by this session. Errors are logged and
    /// non-fatal to the caller (spec.md §4.11 cleanup semantics).
    async fn close(&self) -> Result<(), ExecutorError>;

    async fn validate_selector(&self, selector: &str) -> SelectorValidation {
        let count = self.query_selector_count(selector).await;
        let is_visible = if count > 0 {
            self.is_visible(selector).await
        } else {
            false
        };
        SelectorValidation {
            exists: count > 0,
            is_unique: count == 1,
            is_visible,
            count,
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    /// Scripted in-process [`BrowserSession`] for tests.
    pub struct MockBrowserSession {
        pub url: RwLock<String>,
        pub html_content: RwLock<String>,
        pub selector_counts: RwLock<HashMap<String, usize>>,
        pub visible_selectors: RwLock<HashMap<String, bool>>,
        pub typed_values: RwLock<HashMap<String, String>>,
        pub action_calls: AtomicUsize,
        pub closed: AtomicUsize,
    }

    impl MockBrowserSession {
        pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
            Self {
                url: RwLock::new(url.into()),
                html_content: RwLock::new(html.into()),
                selector_counts: RwLock::new(HashMap::new()),
                visible_selectors: RwLock::new(HashMap::new()),
                typed_values: RwLock::new(HashMap::new()),
                action_calls: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }
        }

        pub async fn with_selector(self, selector: &str, count: usize, visible: bool) -> Self {
            self.selector_counts.write().await.insert(selector.to_string(), count);
            self.visible_selectors.write().await.insert(selector.to_string(), visible);
            self
        }
    }

    #[async_trait]
    impl BrowserSession for MockBrowserSession {
        async fn current_url(&self) -> String {
            self.url.read().await.clone()
        }

        async fn html(&self) -> String {
            self.html_content.read().await.clone()
        }

        async fn screenshot_base64(&self, _quality: u8) -> Option<String> {
            Some("base64-jpeg-stub".to_string())
        }

        async fn query_selector_count(&self, selector: &str) -> usize {
            self.selector_counts.read().await.get(selector).copied().unwrap_or(0)
        }

        async fn is_visible(&self, selector: &str) -> bool {
            self.visible_selectors.read().await.get(selector).copied().unwrap_or(false)
        }

        async fn wait_for_networkidle(&self, _timeout: Duration) -> bool {
            true
        }

        async fn execute(&self, action: &Action) -> Result<ActionOutcome, ExecutorError> {
            self.action_calls.fetch_add(1, Ordering::SeqCst);
            match action.name.as_str() {
                "navigate" => {
                    if let Some(url) = action.argument_str("url") {
                        *self.url.write().await = url.to_string();
                    }
                    Ok(ActionOutcome::success(SnapshotMetadata {
                        url: Some(self.current_url().await),
                        ..Default::default()
                    }))
                }
                "type" => {
                    let selector = action.argument_str("selector").unwrap_or_default().to_string();
                    let value = action.argument_str("value").unwrap_or_default().to_string();
                    self.typed_values.write().await.insert(selector.clone(), value.clone());
                    Ok(ActionOutcome::success(SnapshotMetadata {
                        url: Some(self.current_url().await),
                        typed_value: Some(value),
                        input_selector: Some(selector),
                        ..Default::default()
                    }))
                }
                "click" | "hover" => {
                    let selector = action.argument_str("selector").unwrap_or_default();
                    let validation = self.validate_selector(selector).await;
                    if validation.exists {
                        Ok(ActionOutcome::success(SnapshotMetadata {
                            url: Some(self.current_url().await),
                            ..Default::default()
                        }))
                    } else {
                        Ok(ActionOutcome::failure(
                            SnapshotMetadata {
                                url: Some(self.current_url().await),
                                ..Default::default()
                            },
                            format!("selector not found: {selector}"),
                        ))
                    }
                }
                _ => Ok(ActionOutcome::success(SnapshotMetadata {
                    url: Some(self.current_url().await),
                    html_length: Some(self.html().await.len()),
                    ..Default::default()
                })),
            }
        }

        async fn close(&self) -> Result<(), ExecutorError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn validate_selector_reports_exists_and_visible() {
        let session = MockBrowserSession::new("https://example.com", "<html/>")
            .with_selector("#submit", 1, true)
            .await;
        let validation = session.validate_selector("#submit").await;
        assert!(validation.exists);
        assert!(validation.is_unique);
        assert!(validation.is_visible);
    }

    #[tokio::test]
    async fn click_on_missing_selector_fails() {
        let session = MockBrowserSession::new("https://example.com", "<html/>");
        let outcome = session
            .execute(&Action::new("click").with_arg("selector", "#missing"))
            .await
            .unwrap();
        assert_eq!(outcome.status, StepStatus::Failure);
    }
}
