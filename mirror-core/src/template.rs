//! Reference templating: `{{ <software>_version }}` placeholders in manifest
//! entries are rendered once with Tera when a task is built.

use std::collections::BTreeMap;

use tera::{Context, Tera};

use crate::error::ConfigError;

/// Variables available to reference templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    context: Context,
}

impl TemplateVars {
    pub fn new(vars: &BTreeMap<String, String>) -> Self {
        let mut context = Context::new();
        for (key, value) in vars {
            context.insert(key.as_str(), value);
        }
        Self { context }
    }

    /// Render `template`; strings without a placeholder pass through.
    pub fn render(&self, template: &str) -> Result<String, ConfigError> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }
        Tera::one_off(template, &self.context, false).map_err(|source| ConfigError::Template {
            template: template.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        let mut map = BTreeMap::new();
        map.insert("k8s_version".to_string(), "1.31.4".to_string());
        TemplateVars::new(&map)
    }

    #[test]
    fn renders_version_placeholder() {
        let out = vars()
            .render("https://dl.k8s.io/v{{ k8s_version }}/kubectl")
            .expect("render");
        assert_eq!(out, "https://dl.k8s.io/v1.31.4/kubectl");
    }

    #[test]
    fn plain_strings_pass_through_untouched() {
        let out = vars().render("docker.io/library/busybox").expect("render");
        assert_eq!(out, "docker.io/library/busybox");
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let err = vars().render("{{ cuda_version }}").unwrap_err();
        assert!(matches!(err, ConfigError::Template { .. }));
    }
}
