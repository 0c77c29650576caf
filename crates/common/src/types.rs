//! Core types for Flowcheck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::Error;

/// Lifecycle status shared by runs and cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Passed => "PASSED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target deployment of the application under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Dev
    }
}

impl Environment {
    pub const ALL: [Environment; 3] = [Environment::Dev, Environment::Staging, Environment::Prod];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }

    /// Prefix used for per-environment variables, e.g. `STAGING_BASE_URL`
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::Staging => "STAGING",
            Environment::Prod => "PROD",
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" => Ok(Environment::Prod),
            other => Err(Error::InvalidEnvironment(other.to_string())),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of the case created by the workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDetails {
    pub title: String,
    pub plaintiff_name: String,
    pub medical_provider: String,
    pub description: String,
}

impl CaseDetails {
    /// Placeholder details used when a request does not supply any
    pub fn placeholder(run_id: &str) -> Self {
        Self {
            title: format!("Automation Case {}", run_id),
            plaintiff_name: "Jordan Example".to_string(),
            medical_provider: "General Hospital".to_string(),
            description: format!("Case created by automated workflow run {}", run_id),
        }
    }

    /// Ordered `(key, value)` pairs for reports and templating
    pub fn fields(&self) -> [(&'static str, &str); 4] {
        [
            ("title", self.title.as_str()),
            ("plaintiff_name", self.plaintiff_name.as_str()),
            ("medical_provider", self.medical_provider.as_str()),
            ("description", self.description.as_str()),
        ]
    }
}

/// Origin of a run started by an external event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub repository: String,
    pub event_type: String,
    pub sender: String,
}

/// Parameter snapshot recorded when a run is created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    #[serde(default)]
    pub env: Environment,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_details: Option<CaseDetails>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_folder_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imaging_file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imaging_folder_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerInfo>,

    /// Anything else the caller supplied, recorded verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RunParameters {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            ..Default::default()
        }
    }

    pub fn with_case_details(mut self, details: CaseDetails) -> Self {
        self.case_details = Some(details);
        self
    }
}

/// Which output stream a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One line of workflow output for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub run_id: String,
    pub stream: LogStream,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    pub fn new(run_id: impl Into<String>, stream: LogStream, text: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            stream,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&RunStatus::Failed).unwrap();
        assert_eq!(json, "\"FAILED\"");
        assert_eq!(RunStatus::Passed.to_string(), "PASSED");
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("Staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert_eq!(" prod ".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_parameters_keep_unknown_keys() {
        let params: RunParameters =
            serde_json::from_str(r#"{"env":"dev","build":"1234"}"#).unwrap();
        assert_eq!(params.env, Environment::Dev);
        assert_eq!(params.extra.get("build"), Some(&serde_json::json!("1234")));

        let back = serde_json::to_value(&params).unwrap();
        assert_eq!(back, serde_json::json!({"env": "dev", "build": "1234"}));
    }
}
