//! Application configuration
//!
//! Settings come from a TOML file when one is present, otherwise from
//! environment variables. Each target environment (dev, staging, prod) has its
//! own credentials and mail settings, read from `<PREFIX>_*` variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Environment, Error, Result};

const MASK: &str = "********";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Control API listen address
    pub listen: String,

    /// Directory for persisted run documents
    pub results_dir: PathBuf,

    /// Directory for screenshots written to disk
    pub screenshots_dir: PathBuf,

    /// Also write every captured screenshot to `screenshots_dir`
    pub save_screenshots_to_disk: bool,

    /// Workflow definition (YAML)
    pub workflow_path: PathBuf,

    /// Command used to launch the browser bridge
    pub node_binary: String,

    /// Default upload sources used when a request does not name any
    pub defaults: DefaultPaths,

    pub dev: EnvironmentConfig,
    pub staging: EnvironmentConfig,
    pub prod: EnvironmentConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
            results_dir: PathBuf::from("test_results"),
            screenshots_dir: PathBuf::from("screenshots"),
            save_screenshots_to_disk: false,
            workflow_path: PathBuf::from("workflows/default.yaml"),
            node_binary: "node".to_string(),
            defaults: DefaultPaths::default(),
            dev: EnvironmentConfig::default(),
            staging: EnvironmentConfig::default(),
            prod: EnvironmentConfig::default(),
        }
    }
}

/// Default upload sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultPaths {
    pub notes_file_path: String,
    pub notes_folder_path: String,
    pub imaging_file_path: String,
    pub imaging_folder_path: String,
}

impl Default for DefaultPaths {
    fn default() -> Self {
        Self {
            notes_file_path: "./sample_data/sample_notes.pdf".to_string(),
            notes_folder_path: "./sample_data/notes_folder".to_string(),
            imaging_file_path: "./sample_data/sample_image.dcm".to_string(),
            imaging_folder_path: "./sample_data/imaging_folder".to_string(),
        }
    }
}

/// Per-environment settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub base_url: Option<String>,
    pub login_email: Option<String>,
    pub login_password: Option<String>,
    pub smtp: SmtpConfig,
}

/// Outbound mail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub server: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Raw recipient entries, validated when the notifier is built
    pub recipients: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: None,
            port: 587,
            username: None,
            password: None,
            recipients: Vec::new(),
            timeout_secs: 5,
        }
    }
}

impl SmtpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, or from the environment when the
    /// file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::from_env())
        }
    }

    /// Build configuration from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();
        let defaults = DefaultPaths::default();

        Self {
            listen: lookup("FLOWCHECK_LISTEN").unwrap_or(base.listen),
            results_dir: lookup("FLOWCHECK_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(base.results_dir),
            screenshots_dir: lookup("SCREENSHOTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(base.screenshots_dir),
            save_screenshots_to_disk: lookup("SAVE_SCREENSHOTS_TO_DISK")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            workflow_path: lookup("FLOWCHECK_WORKFLOW")
                .map(PathBuf::from)
                .unwrap_or(base.workflow_path),
            node_binary: lookup("FLOWCHECK_NODE").unwrap_or(base.node_binary),
            defaults: DefaultPaths {
                notes_file_path: lookup("DEFAULT_NOTES_FILE_PATH")
                    .unwrap_or(defaults.notes_file_path),
                notes_folder_path: lookup("DEFAULT_NOTES_FOLDER_PATH")
                    .unwrap_or(defaults.notes_folder_path),
                imaging_file_path: lookup("DEFAULT_IMAGING_FILE_PATH")
                    .unwrap_or(defaults.imaging_file_path),
                imaging_folder_path: lookup("DEFAULT_IMAGING_FOLDER_PATH")
                    .unwrap_or(defaults.imaging_folder_path),
            },
            dev: EnvironmentConfig::from_lookup(Environment::Dev, &lookup),
            staging: EnvironmentConfig::from_lookup(Environment::Staging, &lookup),
            prod: EnvironmentConfig::from_lookup(Environment::Prod, &lookup),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Settings for one environment
    pub fn environment(&self, env: Environment) -> &EnvironmentConfig {
        match env {
            Environment::Dev => &self.dev,
            Environment::Staging => &self.staging,
            Environment::Prod => &self.prod,
        }
    }
}

impl EnvironmentConfig {
    /// Read `<PREFIX>_*` variables for one environment
    pub fn from_env(env: Environment) -> Self {
        Self::from_lookup(env, &|key: &str| std::env::var(key).ok())
    }

    fn from_lookup<F>(env: Environment, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = env.env_prefix();
        let get = |name: &str| {
            lookup(&format!("{}_{}", prefix, name)).filter(|v| !v.trim().is_empty())
        };

        let smtp_defaults = SmtpConfig::default();
        Self {
            base_url: get("BASE_URL"),
            login_email: get("LOGIN_EMAIL"),
            login_password: get("LOGIN_PASSWORD"),
            smtp: SmtpConfig {
                server: get("SMTP_SERVER"),
                port: get("SMTP_PORT")
                    .and_then(|p| p.trim().parse().ok())
                    .unwrap_or(smtp_defaults.port),
                username: get("EMAIL_USERNAME"),
                password: get("EMAIL_PASSWORD"),
                recipients: get("EMAIL_RECIPIENTS")
                    .map(|v| v.split(',').map(str::to_string).collect())
                    .unwrap_or_default(),
                timeout_secs: get("SMTP_TIMEOUT_SECS")
                    .and_then(|t| t.trim().parse().ok())
                    .unwrap_or(smtp_defaults.timeout_secs),
            },
        }
    }

    /// Check that everything a workflow needs to log in is present
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<String> = [
            ("BASE_URL", &self.base_url),
            ("LOGIN_EMAIL", &self.login_email),
            ("LOGIN_PASSWORD", &self.login_password),
        ]
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(key, _)| key.to_string())
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingConfig(missing))
        }
    }

    /// Human-readable summary with secrets masked
    pub fn summary(&self) -> String {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "<unset>".to_string());
        let secret = |v: &Option<String>| {
            if v.is_some() {
                MASK.to_string()
            } else {
                "<unset>".to_string()
            }
        };

        format!(
            "BASE_URL: {}\nLOGIN_EMAIL: {}\nLOGIN_PASSWORD: {}\nSMTP_SERVER: {}:{}\nEMAIL_USERNAME: {}\nEMAIL_PASSWORD: {}\nEMAIL_RECIPIENTS: {}",
            show(&self.base_url),
            show(&self.login_email),
            secret(&self.login_password),
            show(&self.smtp.server),
            self.smtp.port,
            show(&self.smtp.username),
            secret(&self.smtp.password),
            self.smtp.recipients.join(","),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_per_environment_variables() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("STAGING_BASE_URL", "https://staging.example.com"),
            ("STAGING_SMTP_PORT", "2525"),
            ("STAGING_EMAIL_RECIPIENTS", "a@b.com, c@d.org"),
            ("SAVE_SCREENSHOTS_TO_DISK", "True"),
        ]));

        let staging = config.environment(Environment::Staging);
        assert_eq!(staging.base_url.as_deref(), Some("https://staging.example.com"));
        assert_eq!(staging.smtp.port, 2525);
        assert_eq!(staging.smtp.recipients, vec!["a@b.com", " c@d.org"]);
        assert!(config.save_screenshots_to_disk);

        assert!(config.environment(Environment::Dev).base_url.is_none());
        assert_eq!(config.environment(Environment::Dev).smtp.port, 587);
    }

    #[test]
    fn test_validate_lists_missing_keys() {
        let env = EnvironmentConfig {
            base_url: Some("https://app.example.com".to_string()),
            ..Default::default()
        };
        let err = env.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required configuration: LOGIN_EMAIL, LOGIN_PASSWORD"
        );
    }

    #[test]
    fn test_summary_masks_secrets() {
        let env = EnvironmentConfig {
            login_email: Some("qa@example.com".to_string()),
            login_password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let summary = env.summary();
        assert!(summary.contains("qa@example.com"));
        assert!(summary.contains(MASK));
        assert!(!summary.contains("hunter2"));
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowcheck.toml");

        let mut config = AppConfig::default();
        config.prod.base_url = Some("https://app.example.com".to_string());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.prod.base_url.as_deref(), Some("https://app.example.com"));
        assert_eq!(loaded.listen, config.listen);
    }

    #[test]
    fn test_env_file_feeds_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(
            &env_file,
            "PROD_BASE_URL=https://prod.example.com\nPROD_LOGIN_EMAIL=ops@example.com\n",
        )
        .unwrap();
        dotenvy::from_filename(&env_file).unwrap();

        let config = AppConfig::load(&dir.path().join("missing.toml")).unwrap();
        let prod = config.environment(Environment::Prod);
        assert_eq!(prod.base_url.as_deref(), Some("https://prod.example.com"));
        assert_eq!(prod.login_email.as_deref(), Some("ops@example.com"));
    }
}
