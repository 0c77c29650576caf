//! `{{key}}` substitution for workflow steps

use flowcheck_common::{CaseDetails, DefaultPaths, EnvironmentConfig, RunParameters};
use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::error::{DriverError, DriverResult};

// Step values are typed into the page verbatim, so nothing is escaped. Strict
// mode turns a reference to a missing key into a render error.
static ENGINE: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut engine = Handlebars::new();
    engine.set_strict_mode(true);
    engine.register_escape_fn(handlebars::no_escape);
    engine
});

/// Values available to step templates
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: Map<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for one run: environment credentials, case details and the
    /// upload sources, falling back to configured defaults
    pub fn for_run(
        run_id: &str,
        env: &EnvironmentConfig,
        params: &RunParameters,
        defaults: &DefaultPaths,
    ) -> Self {
        let mut ctx = Self::new();
        ctx.insert("run_id", run_id);
        ctx.insert("env", params.env.as_str());

        for (key, value) in [
            ("base_url", &env.base_url),
            ("login_email", &env.login_email),
            ("login_password", &env.login_password),
        ] {
            if let Some(value) = value {
                ctx.insert(key, value.as_str());
            }
        }

        let details = params
            .case_details
            .clone()
            .unwrap_or_else(|| CaseDetails::placeholder(run_id));
        let case: Map<String, Value> = details
            .fields()
            .into_iter()
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect();
        ctx.values.insert("case".to_string(), Value::Object(case));

        let paths = [
            ("notes_file_path", &params.notes_file_path, &defaults.notes_file_path),
            ("notes_folder_path", &params.notes_folder_path, &defaults.notes_folder_path),
            ("imaging_file_path", &params.imaging_file_path, &defaults.imaging_file_path),
            ("imaging_folder_path", &params.imaging_folder_path, &defaults.imaging_folder_path),
        ];
        for (key, given, fallback) in paths {
            ctx.insert(key, given.as_deref().unwrap_or(fallback.as_str()));
        }

        ctx
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), Value::String(value.into()));
    }

    /// Look up a value by dotted path, e.g. `case.title`
    pub fn get(&self, key: &str) -> Option<&str> {
        let mut parts = key.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        current.as_str()
    }

    /// Render every `{{ key }}` in `input`. Unknown keys and malformed
    /// references are errors.
    pub fn render(&self, input: &str) -> DriverResult<String> {
        ENGINE
            .render_template(input, &self.values)
            .map_err(|e| DriverError::Template(format!("'{}': {}", input, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcheck_common::Environment;

    fn ctx() -> TemplateContext {
        let env = EnvironmentConfig {
            base_url: Some("https://app.example.com".to_string()),
            login_email: Some("qa@example.com".to_string()),
            login_password: Some("p<a>ss&word".to_string()),
            ..Default::default()
        };
        let params = RunParameters {
            notes_file_path: Some("/data/notes.pdf".to_string()),
            ..RunParameters::new(Environment::Staging)
        };
        TemplateContext::for_run("run_00ff00ff", &env, &params, &DefaultPaths::default())
    }

    #[test]
    fn test_render_substitutes() {
        let ctx = ctx();
        assert_eq!(
            ctx.render("{{base_url}}/login?as={{ login_email }}").unwrap(),
            "https://app.example.com/login?as=qa@example.com"
        );
        assert_eq!(ctx.render("no refs").unwrap(), "no refs");
        assert_eq!(ctx.get("env"), Some("staging"));
    }

    #[test]
    fn test_render_does_not_escape() {
        assert_eq!(ctx().render("{{login_password}}").unwrap(), "p<a>ss&word");
    }

    #[test]
    fn test_paths_fall_back_to_defaults() {
        let ctx = ctx();
        assert_eq!(ctx.get("notes_file_path"), Some("/data/notes.pdf"));
        assert_eq!(
            ctx.get("imaging_folder_path"),
            Some(DefaultPaths::default().imaging_folder_path.as_str())
        );
    }

    #[test]
    fn test_placeholder_case_details() {
        let ctx = ctx();
        let title = CaseDetails::placeholder("run_00ff00ff").title;
        assert_eq!(ctx.get("case.title"), Some(title.as_str()));
        assert_eq!(ctx.render("{{case.title}}").unwrap(), title);
    }

    #[test]
    fn test_unknown_and_unterminated() {
        let ctx = ctx();
        assert!(matches!(ctx.render("{{nope}}"), Err(DriverError::Template(_))));
        assert!(matches!(ctx.render("{{case.nope}}"), Err(DriverError::Template(_))));
        assert!(matches!(ctx.render("{{base_url"), Err(DriverError::Template(_))));
    }
}
