//! Prompt templates
//!
//! The two instruction templates are read from disk once, when the service is
//! built, and shared read-only by every invocation afterwards.

use crate::error::{Result, TextToSqlError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

pub const ON_START_PROMPT_FILE: &str = "on_start.md";
pub const ON_ERROR_PROMPT_FILE: &str = "on_error.md";

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("placeholder pattern is valid")
    })
}

/// Initial-generation and error-correction templates.
#[derive(Debug, Clone)]
pub struct PromptStore {
    on_start: String,
    on_error: String,
}

impl PromptStore {
    /// Load `on_start.md` and `on_error.md` from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let on_start = load_prompt(&dir.join(ON_START_PROMPT_FILE))?;
        let on_error = load_prompt(&dir.join(ON_ERROR_PROMPT_FILE))?;
        Ok(Self { on_start, on_error })
    }

    /// Build a store from in-memory templates.
    pub fn from_templates(on_start: impl Into<String>, on_error: impl Into<String>) -> Self {
        Self {
            on_start: on_start.into(),
            on_error: on_error.into(),
        }
    }

    pub fn on_start(&self) -> &str {
        &self.on_start
    }

    pub fn on_error(&self) -> &str {
        &self.on_error
    }
}

/// Directory holding the templates shipped with the crate.
pub fn default_prompts_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts"))
}

fn load_prompt(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(TextToSqlError::ResourceMissing {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(TextToSqlError::Config(format!(
            "prompt file is empty: {}",
            path.display()
        )));
    }

    debug!("loaded prompt from {}", path.display());
    Ok(content)
}

/// Substitute `{key}` placeholders in `template`.
///
/// `{{` and `}}` produce literal braces. A placeholder whose key is not in
/// `values`, or a stray single brace, is a `PromptFormat` error.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_regex().captures_iter(template) {
        let whole = caps.get(0).expect("group 0 always matches");
        push_literal(&mut out, &template[last..whole.start()])?;
        last = whole.end();

        match caps.get(1) {
            None if whole.as_str() == "{{" => out.push('{'),
            None => out.push('}'),
            Some(key) => {
                let key = key.as_str();
                let value = values
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| {
                        TextToSqlError::PromptFormat(format!("missing key '{}'", key))
                    })?;
                out.push_str(value);
            }
        }
    }

    push_literal(&mut out, &template[last..])?;
    Ok(out)
}

fn push_literal(out: &mut String, literal: &str) -> Result<()> {
    if literal.contains('{') || literal.contains('}') {
        return Err(TextToSqlError::PromptFormat(format!(
            "unbalanced brace in template near '{}'",
            literal.chars().take(30).collect::<String>()
        )));
    }
    out.push_str(literal);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_render_substitutes_keys() {
        let rendered = render_template(
            "question: {user_query}\nlast: {last_error}",
            &[("user_query", "how many videos?"), ("last_error", "boom")],
        )
        .unwrap();
        assert_eq!(rendered, "question: how many videos?\nlast: boom");
    }

    #[test]
    fn test_render_keeps_escaped_braces() {
        let rendered = render_template("json: {{\"a\": {x}}}", &[("x", "1")]).unwrap();
        assert_eq!(rendered, "json: {\"a\": 1}");
    }

    #[test]
    fn test_render_does_not_expand_braces_inside_values() {
        let rendered = render_template("{a}", &[("a", "{b}")]).unwrap();
        assert_eq!(rendered, "{b}");
    }

    #[test]
    fn test_render_missing_key_fails() {
        let err = render_template("{user_query} {unknown}", &[("user_query", "q")]).unwrap_err();
        match err {
            TextToSqlError::PromptFormat(msg) => assert!(msg.contains("unknown")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_render_stray_brace_fails() {
        assert!(matches!(
            render_template("oops } here", &[]),
            Err(TextToSqlError::PromptFormat(_))
        ));
    }

    #[test]
    fn test_load_reads_both_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(ON_START_PROMPT_FILE), "start").unwrap();
        fs::write(dir.path().join(ON_ERROR_PROMPT_FILE), "error {last_error}").unwrap();

        let store = PromptStore::load(dir.path()).unwrap();
        assert_eq!(store.on_start(), "start");
        assert_eq!(store.on_error(), "error {last_error}");
    }

    #[test]
    fn test_load_missing_template_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(ON_START_PROMPT_FILE), "start").unwrap();

        match PromptStore::load(dir.path()) {
            Err(TextToSqlError::ResourceMissing { path }) => {
                assert!(path.ends_with(ON_ERROR_PROMPT_FILE))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_load_empty_template_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(ON_START_PROMPT_FILE), "  \n").unwrap();
        fs::write(dir.path().join(ON_ERROR_PROMPT_FILE), "error").unwrap();

        assert!(matches!(
            PromptStore::load(dir.path()),
            Err(TextToSqlError::Config(_))
        ));
    }

    #[test]
    fn test_shipped_templates_load_and_render() {
        let store = PromptStore::load(default_prompts_dir()).unwrap();
        render_template(
            store.on_error(),
            &[
                ("user_query", "q"),
                ("error_history", "h"),
                ("last_error", "e"),
            ],
        )
        .unwrap();
        render_template(store.on_start(), &[]).unwrap();
    }
}
