//! Prompt templates loaded verbatim from disk.
//!
//! Components resolve `prompts/<name>.prompt` inside the session root and fall
//! back to their compiled-in default when the file is missing or unreadable,
//! so a half-provisioned session directory never takes the pipeline down.

use std::path::Path;

use tracing::warn;

/// A prompt template with `{{placeholder}}` substitution.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    /// Wrap an in-memory template string.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Load a template file verbatim.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            text: std::fs::read_to_string(path)?,
        })
    }

    /// Load `prompts/<name>.prompt` under `root`, falling back to `default`.
    pub fn load_or_default(root: impl AsRef<Path>, name: &str, default: &str) -> Self {
        let path = root.as_ref().join("prompts").join(format!("{name}.prompt"));
        match Self::load(&path) {
            Ok(template) => template,
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "failed to read prompt template, using built-in default");
                }
                Self::from_text(default)
            }
        }
    }

    /// Render the template, replacing each `{{key}}` with its value.
    ///
    /// Unknown placeholders are left untouched.
    pub fn fill(&self, values: &[(&str, &str)]) -> String {
        let mut rendered = self.text.clone();
        for (key, value) in values {
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
        }
        rendered
    }

    /// The raw template text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_placeholders() {
        let template = PromptTemplate::from_text("Role: {{role}}\nText: {{text}}");
        let rendered = template.fill(&[("role", "user"), ("text", "hello")]);
        assert_eq!(rendered, "Role: user\nText: hello");
    }

    #[test]
    fn test_fill_leaves_unknown_placeholders() {
        let template = PromptTemplate::from_text("{{known}} and {{unknown}}");
        let rendered = template.fill(&[("known", "yes")]);
        assert_eq!(rendered, "yes and {{unknown}}");
    }

    #[test]
    fn test_load_or_default_prefers_disk() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = dir.path().join("prompts");
        std::fs::create_dir_all(&prompts).unwrap();
        std::fs::write(prompts.join("digest.prompt"), "custom {{content}}").unwrap();

        let template = PromptTemplate::load_or_default(dir.path(), "digest", "default");
        assert_eq!(template.text(), "custom {{content}}");
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let template = PromptTemplate::load_or_default(dir.path(), "missing", "built-in body");
        assert_eq!(template.text(), "built-in body");
    }
}
