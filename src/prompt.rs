//! `PromptTemplates`, SPEC_FULL.md §2: a minimal opaque named-template
//! registry. Prompt content itself is a non-goal (spec.md treats prompts as
//! opaque); this just gives Planner/Verifier/ElementDiscovery a named,
//! `{var}`-substituted string to call instead of each hand-rolling `format!`.
//!
//! Grounded on the teacher's `prompt::registry`/`prompt::template` module
//! pair, trimmed to the one operation this crate actually needs.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PromptError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),
}

/// A named template with `{var}`-style placeholders.
#[derive(Debug, Clone)]
struct Template {
    content: String,
}

/// Registry of named prompt templates, rendered by substituting `{var}`
/// placeholders with caller-supplied values.
#[derive(Debug, Clone, Default)]
pub struct PromptTemplates {
    templates: HashMap<String, Template>,
}

impl PromptTemplates {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), Template { content: content.into() });
        self
    }

    /// Substitute every `{key}` placeholder in `name`'s template with its
    /// value from `vars`. A placeholder with no matching key is left as-is.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let template = self.templates.get(name).ok_or_else(|| PromptError::TemplateNotFound(name.to_string()))?;
        let mut rendered = template.content.clone();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_placeholders() {
        let mut templates = PromptTemplates::new();
        templates.register("greeting", "Hello, {name}! Welcome to {place}.");

        let rendered = templates.render("greeting", &[("name", "Ada"), ("place", "the lab")]).unwrap();
        assert_eq!(rendered, "Hello, Ada! Welcome to the lab.");
    }

    #[test]
    fn render_leaves_unmatched_placeholders_untouched() {
        let mut templates = PromptTemplates::new();
        templates.register("partial", "Hi {name}, your role is {role}.");

        let rendered = templates.render("partial", &[("name", "Ada")]).unwrap();
        assert_eq!(rendered, "Hi Ada, your role is {role}.");
    }

    #[test]
    fn render_unknown_template_errors() {
        let templates = PromptTemplates::new();
        assert!(matches!(templates.render("missing", &[]), Err(PromptError::TemplateNotFound(_))));
    }
}
