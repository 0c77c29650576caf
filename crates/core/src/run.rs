//! Run aggregation
//!
//! A [`TestRun`] owns the run-level timing and status, the ordered cases and
//! every captured artifact. Status moves `RUNNING -> PASSED` or
//! `RUNNING -> FAILED`; once a case fails the run stays failed.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use flowcheck_common::{RunParameters, RunStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactStore};
use crate::case::{duration_seconds, CaseSnapshot, TestCase};
use crate::notify::{Delivery, NoopNotifier, Notifier, RunReport};

/// Immutable view of a run, also the persisted document layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub parameters: RunParameters,
    pub artifacts: Vec<String>,
    pub artifact_count: usize,
    pub cases: Vec<CaseSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Generate a run id: `<prefix>_<8 hex chars>`
pub fn generate_run_id(prefix: &str) -> String {
    format!("{}_{}", prefix, hex::encode(rand::random::<[u8; 4]>()))
}

pub struct TestRun {
    run_id: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: RunStatus,
    error_message: Option<String>,
    parameters: RunParameters,
    /// Kept in first-start order
    cases: Vec<TestCase>,
    artifacts: ArtifactStore,
    notified: bool,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for TestRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRun")
            .field("run_id", &self.run_id)
            .field("status", &self.status)
            .field("cases", &self.cases.len())
            .field("artifacts", &self.artifacts.len())
            .field("notified", &self.notified)
            .finish()
    }
}

impl TestRun {
    /// Create a run with a fresh `run_` id
    pub fn new(parameters: RunParameters) -> Self {
        Self::with_id(generate_run_id("run"), parameters)
    }

    pub fn with_id(run_id: impl Into<String>, parameters: RunParameters) -> Self {
        Self {
            run_id: run_id.into(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            error_message: None,
            parameters,
            cases: Vec::new(),
            artifacts: ArtifactStore::new(),
            notified: false,
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn parameters(&self) -> &RunParameters {
        &self.parameters
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn is_notified(&self) -> bool {
        self.notified
    }

    pub fn case(&self, name: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.name() == name)
    }

    fn case_mut(&mut self, name: &str) -> Option<&mut TestCase> {
        self.cases.iter_mut().find(|c| c.name() == name)
    }

    /// Open a case. Restarting an existing name replaces its tracker but
    /// keeps its position in the report.
    pub fn start_case(&mut self, name: &str) -> CaseSnapshot {
        let case = TestCase::start(name, &self.run_id);
        let snapshot = case.snapshot();
        match self.cases.iter_mut().find(|c| c.name() == name) {
            Some(existing) => {
                debug!("Restarting case '{}' in run {}", name, self.run_id);
                *existing = case;
            }
            None => self.cases.push(case),
        }
        snapshot
    }

    /// Close a case, opening it first when it was never started.
    ///
    /// The first failing case marks the whole run failed and, unless the run
    /// already carries an error, records its message on the run.
    pub fn end_case(
        &mut self,
        name: &str,
        passed: bool,
        error_message: Option<String>,
    ) -> CaseSnapshot {
        let now = Utc::now();
        let index = match self.cases.iter().position(|c| c.name() == name) {
            Some(index) => {
                if self.cases[index].status().is_terminal() {
                    debug!("Case '{}' ended again, overwriting previous outcome", name);
                }
                index
            }
            None => {
                debug!("Ending case '{}' that was never started", name);
                self.cases.push(TestCase::start_at(name, &self.run_id, now));
                self.cases.len() - 1
            }
        };

        let run_message = if passed {
            None
        } else {
            Some(format!(
                "Test case '{}' failed: {}",
                name,
                error_message.as_deref().unwrap_or("unknown error")
            ))
        };

        let case = &mut self.cases[index];
        case.end_at(now, passed, error_message);
        let snapshot = case.snapshot();

        if let Some(message) = run_message {
            if self.status != RunStatus::Failed {
                self.status = RunStatus::Failed;
                if self.error_message.is_none() {
                    self.error_message = Some(message);
                }
            }
        }

        snapshot
    }

    /// Record a screenshot on the run and, when that case exists, on a case
    pub fn add_artifact(
        &mut self,
        payload: impl Into<Bytes>,
        filename: impl Into<String>,
        case_name: Option<&str>,
    ) -> Arc<Artifact> {
        let artifact = Arc::new(Artifact::new(filename, payload));
        self.artifacts.push(artifact.clone());
        if let Some(name) = case_name {
            match self.case_mut(name) {
                Some(case) => case.add_artifact(artifact.clone()),
                None => debug!("No case '{}' for artifact {}", name, artifact.filename),
            }
        }
        artifact
    }

    /// Finalize as passed unless a case already failed, then dispatch the report
    pub async fn mark_passed(&mut self) -> RunSnapshot {
        let snapshot = self.record_passed();
        self.dispatch_notification().await;
        snapshot
    }

    /// Finalize as failed with `error_message`, then dispatch the report
    pub async fn mark_failed(&mut self, error_message: impl Into<String>) -> RunSnapshot {
        let snapshot = self.record_failed(error_message);
        self.dispatch_notification().await;
        snapshot
    }

    /// Apply the passed outcome without dispatching. The first finalize fixes
    /// `end_time`; later ones still update status.
    pub fn record_passed(&mut self) -> RunSnapshot {
        if self.status != RunStatus::Failed {
            self.status = RunStatus::Passed;
        }
        self.close()
    }

    /// Apply the failed outcome without dispatching
    pub fn record_failed(&mut self, error_message: impl Into<String>) -> RunSnapshot {
        self.status = RunStatus::Failed;
        self.error_message = Some(error_message.into());
        self.close()
    }

    fn close(&mut self) -> RunSnapshot {
        self.end_time.get_or_insert_with(Utc::now);
        info!(
            "Run {} finished with status {} ({} case(s), {} screenshot(s))",
            self.run_id,
            self.status,
            self.cases.len(),
            self.artifacts.len()
        );
        self.snapshot()
    }

    /// Attempt report delivery. Succeeds at most once per run; failures leave
    /// the run eligible for another attempt.
    pub async fn dispatch_notification(&mut self) -> bool {
        if self.notified {
            info!("Report already sent for run {}", self.run_id);
            return false;
        }

        let report = self.report();
        match self.notifier.deliver(&report).await {
            Ok(Delivery::Sent) => {
                self.notified = true;
                info!("Report sent for run {}", self.run_id);
                true
            }
            Ok(Delivery::Skipped(reason)) => {
                info!("Report for run {} not sent: {}", self.run_id, reason);
                false
            }
            Err(e) => {
                warn!("Failed to send report for run {}: {}", self.run_id, e);
                false
            }
        }
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id.clone(),
            status: self.status,
            snapshot: self.snapshot(),
            artifacts: self.artifacts.to_vec(),
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_seconds: duration_seconds(self.start_time, self.end_time),
            parameters: self.parameters.clone(),
            artifacts: self.artifacts.filenames(),
            artifact_count: self.artifacts.len(),
            cases: self.cases.iter().map(TestCase::snapshot).collect(),
            error_message: self.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NotifyError, NotifyResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingNotifier {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn deliver(&self, _report: &RunReport) -> NotifyResult<Delivery> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Transport("connection refused".to_string()))
            } else {
                Ok(Delivery::Sent)
            }
        }
    }

    #[test]
    fn test_run_id_shape() {
        let id = generate_run_id("run");
        assert!(id.starts_with("run_"));
        assert_eq!(id.len(), 12);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_run_is_running() {
        let run = TestRun::new(RunParameters::default());
        let snap = run.snapshot();
        assert_eq!(snap.status, RunStatus::Running);
        assert!(snap.end_time.is_none());
        assert!(snap.duration_seconds.is_none());
        assert!(snap.cases.is_empty());
        assert!(!run.is_notified());
    }

    #[test]
    fn test_restart_keeps_position() {
        let mut run = TestRun::new(RunParameters::default());
        run.start_case("Login");
        run.start_case("Upload");
        run.end_case("Login", false, Some("bad".to_string()));
        run.start_case("Login");

        let snap = run.snapshot();
        let names: Vec<_> = snap.cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Login", "Upload"]);
        assert_eq!(snap.cases[0].status, RunStatus::Running);
        // the run failure is sticky even though the case was restarted
        assert_eq!(snap.status, RunStatus::Failed);
    }

    #[test]
    fn test_artifact_for_unknown_case_stays_run_level() {
        let mut run = TestRun::new(RunParameters::default());
        run.add_artifact(b"png".to_vec(), "final_error.png", Some("Overall Test"));
        assert_eq!(run.artifacts().len(), 1);
        assert!(run.case("Overall Test").is_none());
    }

    #[test]
    fn test_missing_case_message() {
        let mut run = TestRun::new(RunParameters::default());
        run.end_case("Login", false, None);
        assert_eq!(
            run.error_message(),
            Some("Test case 'Login' failed: unknown error")
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_can_be_retried() {
        let notifier = CountingNotifier::new(true);
        let mut run = TestRun::new(RunParameters::default()).with_notifier(notifier.clone());

        run.mark_passed().await;
        assert!(!run.is_notified());
        assert!(!run.dispatch_notification().await);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_successful_delivery_happens_once() {
        let notifier = CountingNotifier::new(false);
        let mut run = TestRun::new(RunParameters::default()).with_notifier(notifier.clone());

        run.mark_passed().await;
        run.mark_failed("late failure").await;
        assert!(!run.dispatch_notification().await);

        assert!(run.is_notified());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }
}
