//! Structural DOM summary and selector validation, spec.md §4.5.
//!
//! The teacher has no HTML-parsing precedent (it never touches a DOM); this
//! module is grounded on the crate's own `BrowserSession` capability
//! boundary and uses `regex` (already a teacher dependency, used there for
//! PII scrubbing) for lightweight tag/attribute scanning rather than
//! pulling in a full HTML engine the rest of the corpus never reaches for.
//! `BrowserSession` has no geometry query, so `includePosition` degrades to
//! `position: None` for every record rather than fabricating coordinates;
//! see DESIGN.md.

use crate::browser::BrowserSession;
use patterns::{attrs_regex, tag_regex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub max_elements: usize,
    pub include_position: bool,
    pub include_containers: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_elements: 200,
            include_position: false,
            include_containers: true,
        }
    }
}

const INTERACTIVE_TAGS: [&str; 8] = ["button", "a", "input", "select", "textarea", "h1", "h2", "h3"];
const HEADING_TAGS: [&str; 3] = ["h4", "h5", "h6"];
const CONTAINER_TAGS: [&str; 6] = ["form", "section", "article", "nav", "header", "footer"];
const CONTAINER_EXTRA: [&str; 2] = ["aside", "main"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "aria-label", skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "data-testid", skip_serializing_if = "Option::is_none")]
    pub data_testid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub top: i64,
    pub left: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRecord {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    pub attributes: ElementAttributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_viewport: Option<bool>,
}

mod patterns {
    use regex::Regex;
    use std::sync::OnceLock;

    pub fn tag_regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r#"<([a-zA-Z][a-zA-Z0-9]*)((?:\s+[^<>]*)?)/?>"#).unwrap())
    }

    pub fn attrs_regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*"([^"]*)""#).unwrap())
    }
}

fn text_between(html: &str, tag_end: usize) -> String {
    let rest = &html[tag_end..];
    let close = rest.find('<').unwrap_or(rest.len());
    rest[..close].trim().chars().take(100).collect()
}

fn attr_value(attrs: &str, key: &str) -> Option<String> {
    attrs_regex().captures_iter(attrs).find_map(|cap| {
        if cap[1].eq_ignore_ascii_case(key) {
            Some(cap[2].to_string())
        } else {
            None
        }
    })
}

fn parse_classes(attrs: &str) -> Vec<String> {
    attr_value(attrs, "class")
        .map(|value| value.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn has_role(attrs: &str, roles: &[&str]) -> bool {
    attr_value(attrs, "role")
        .map(|role| roles.iter().any(|r| r.eq_ignore_ascii_case(&role)))
        .unwrap_or(false)
}

fn is_selectable(tag: &str, attrs: &str, include_containers: bool) -> bool {
    let tag_lower = tag.to_lowercase();
    if INTERACTIVE_TAGS.contains(&tag_lower.as_str()) || HEADING_TAGS.contains(&tag_lower.as_str()) {
        return true;
    }
    if has_role(attrs, &["button", "link"])
        || attr_value(attrs, "data-testid").is_some()
        || attr_value(attrs, "data-test-id").is_some()
        || attr_value(attrs, "id").is_some()
    {
        return true;
    }
    if include_containers {
        if CONTAINER_TAGS.contains(&tag_lower.as_str()) || CONTAINER_EXTRA.contains(&tag_lower.as_str()) {
            return true;
        }
        if has_role(attrs, &["form", "dialog", "menu", "navigation"]) {
            return true;
        }
        let classes = parse_classes(attrs).join(" ").to_lowercase();
        if tag_lower == "div" && (classes.contains("form") || classes.contains("modal") || classes.contains("dialog") || classes.contains("menu")) {
            return true;
        }
    }
    false
}

/// Produces a compact structural summary of a page and validates/ranks
/// candidate selectors, given a live [`BrowserSession`].
pub struct DOMExtractor<'a> {
    session: &'a dyn BrowserSession,
}

impl<'a> DOMExtractor<'a> {
    pub fn new(session: &'a dyn BrowserSession) -> Self {
        Self { session }
    }

    /// Returns a JSON array of up to `opts.max_elements` element records.
    /// On extraction failure, returns `"[]"`.
    pub async fn extract(&self, opts: ExtractOptions) -> String {
        let html = self.session.html().await;
        let records = self.extract_records(&html, opts);
        serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string())
    }

    fn extract_records(&self, html: &str, opts: ExtractOptions) -> Vec<ElementRecord> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for capture in tag_regex().captures_iter(html) {
            if records.len() >= opts.max_elements {
                break;
            }
            let tag = capture[1].to_string();
            let attrs = capture.get(2).map(|m| m.as_str()).unwrap_or("");
            if !is_selectable(&tag, attrs, opts.include_containers) {
                continue;
            }

            let id = attr_value(attrs, "id");
            let classes = parse_classes(attrs);
            let dedup_key = (tag.to_lowercase(), id.clone(), classes.join("."));
            if !seen.insert(dedup_key) {
                continue;
            }

            let text = text_between(html, capture.get(0).unwrap().end());
            let attributes = ElementAttributes {
                role: attr_value(attrs, "role"),
                type_: attr_value(attrs, "type"),
                name: attr_value(attrs, "name"),
                aria_label: attr_value(attrs, "aria-label"),
                placeholder: attr_value(attrs, "placeholder"),
                value: attr_value(attrs, "value"),
                title: attr_value(attrs, "title"),
                data_testid: attr_value(attrs, "data-testid").or_else(|| attr_value(attrs, "data-test-id")),
            };

            records.push(ElementRecord {
                tag: tag.to_lowercase(),
                id,
                classes,
                role: attributes.role.clone(),
                type_: attributes.type_.clone(),
                name: attributes.name.clone(),
                test_id: attributes.data_testid.clone(),
                label: attributes.aria_label.clone(),
                attributes,
                text,
                position: None,
                in_viewport: if opts.include_position { Some(true) } else { None },
            });
        }

        records
    }

    pub async fn validate_selector(&self, selector: &str) -> crate::browser::SelectorValidation {
        self.session.validate_selector(selector).await
    }
}

#[derive(Debug, Clone)]
pub struct BestSelectorResult {
    pub selector: Option<String>,
    pub confidence: f64,
    pub validation: crate::browser::SelectorValidation,
}

impl<'a> DOMExtractor<'a> {
    /// Iterate `candidates` in order, returning the first that exists and is
    /// visible, with confidence `0.7 + 0.2*is_unique + 0.1*is_visible`
    /// clamped to `[0, 1]`.
    pub async fn best_selector(&self, candidates: &[String]) -> BestSelectorResult {
        for candidate in candidates {
            let validation = self.validate_selector(candidate).await;
            if validation.exists && validation.is_visible {
                let confidence: f64 = (0.7_f64
                    + if validation.is_unique { 0.2 } else { 0.0 }
                    + if validation.is_visible { 0.1 } else { 0.0 })
                .clamp(0.0, 1.0);
                return BestSelectorResult {
                    selector: Some(candidate.clone()),
                    confidence,
                    validation,
                };
            }
        }
        BestSelectorResult {
            selector: None,
            confidence: 0.0,
            validation: crate::browser::SelectorValidation::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBrowserSession;

    #[tokio::test]
    async fn extract_includes_interactive_elements_and_dedups() {
        let html = r#"<html><body>
            <button id="submit" class="btn primary">Submit</button>
            <button id="submit" class="btn primary">Submit again</button>
            <input type="email" name="email" placeholder="you@example.com" />
            <div class="modal-wrapper">hidden</div>
        </body></html>"#;
        let session = MockBrowserSession::new("https://example.com", html);
        let extractor = DOMExtractor::new(&session);

        let json = extractor.extract(ExtractOptions::default()).await;
        let records: Vec<ElementRecord> = serde_json::from_str(&json).unwrap();

        assert_eq!(records.iter().filter(|r| r.tag == "button").count(), 1);
        assert!(records.iter().any(|r| r.tag == "input" && r.attributes.placeholder.as_deref() == Some("you@example.com")));
    }

    #[tokio::test]
    async fn extract_respects_max_elements() {
        let mut html = String::from("<html><body>");
        for i in 0..10 {
            html.push_str(&format!(r#"<button id="btn-{i}">B{i}</button>"#));
        }
        html.push_str("</body></html>");
        let session = MockBrowserSession::new("https://example.com", html);
        let extractor = DOMExtractor::new(&session);

        let json = extractor
            .extract(ExtractOptions {
                max_elements: 3,
                ..Default::default()
            })
            .await;
        let records: Vec<ElementRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn best_selector_returns_first_existing_visible_candidate() {
        let session = MockBrowserSession::new("https://example.com", "<html/>")
            .with_selector("#missing", 0, false)
            .await
            .with_selector("#present", 1, true)
            .await;
        let extractor = DOMExtractor::new(&session);

        let result = extractor
            .best_selector(&["#missing".to_string(), "#present".to_string()])
            .await;

        assert_eq!(result.selector.as_deref(), Some("#present"));
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn best_selector_returns_none_when_nothing_matches() {
        let session = MockBrowserSession::new("https://example.com", "<html/>");
        let extractor = DOMExtractor::new(&session);
        let result = extractor.best_selector(&["#gone".to_string()]).await;
        assert!(result.selector.is_none());
    }
}
