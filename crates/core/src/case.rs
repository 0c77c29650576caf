//! Per-phase case tracking

use chrono::{DateTime, Utc};
use flowcheck_common::RunStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::artifact::{Artifact, ArtifactStore};

/// One named phase of a run.
///
/// `end_time` is set exactly when `status` is no longer `Running`, and
/// `error_message` is only ever present on a failed case.
#[derive(Debug, Clone)]
pub struct TestCase {
    name: String,
    case_id: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: RunStatus,
    error_message: Option<String>,
    artifacts: ArtifactStore,
}

/// Immutable view of a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub name: String,
    pub case_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub artifacts: Vec<String>,
    pub artifact_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Case id derived from the parent run id and the normalized case name
pub fn case_id(run_id: &str, name: &str) -> String {
    format!("{}_{}", run_id, name.to_lowercase().replace(' ', "_"))
}

pub(crate) fn duration_seconds(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Option<f64> {
    end.map(|end| {
        let elapsed = end - start;
        match elapsed.num_microseconds() {
            Some(us) => us as f64 / 1_000_000.0,
            None => elapsed.num_milliseconds() as f64 / 1_000.0,
        }
    })
}

impl TestCase {
    /// Open a case now
    pub fn start(name: impl Into<String>, run_id: &str) -> Self {
        Self::start_at(name, run_id, Utc::now())
    }

    pub fn start_at(name: impl Into<String>, run_id: &str, at: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            case_id: case_id(run_id, &name),
            name,
            start_time: at,
            end_time: None,
            status: RunStatus::Running,
            error_message: None,
            artifacts: ArtifactStore::new(),
        }
    }

    /// Close the case now
    pub fn end(&mut self, passed: bool, error_message: Option<String>) {
        self.end_at(Utc::now(), passed, error_message);
    }

    /// Close the case at a given instant.
    ///
    /// Ending an already ended case overwrites its timing and outcome.
    pub fn end_at(&mut self, at: DateTime<Utc>, passed: bool, error_message: Option<String>) {
        self.end_time = Some(at);
        if passed {
            self.status = RunStatus::Passed;
            self.error_message = None;
        } else {
            self.status = RunStatus::Failed;
            self.error_message = error_message;
        }
    }

    pub fn add_artifact(&mut self, artifact: Arc<Artifact>) {
        self.artifacts.push(artifact);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn snapshot(&self) -> CaseSnapshot {
        CaseSnapshot {
            name: self.name.clone(),
            case_id: self.case_id.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_seconds: duration_seconds(self.start_time, self.end_time),
            artifacts: self.artifacts.filenames(),
            artifact_count: self.artifacts.len(),
            error_message: self.error_message.clone(),
        }
    }
}
