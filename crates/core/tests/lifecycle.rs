//! Run lifecycle scenarios exercised through the public API

use async_trait::async_trait;
use flowcheck_common::{Environment, RunParameters, RunStatus, SmtpConfig};
use flowcheck_core::{
    Delivery, EmailNotifier, NotifyError, NotifyResult, Notifier, RunHandle, RunReport, TestRun,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Records every report it is handed
#[derive(Default)]
struct RecordingNotifier {
    reports: Mutex<Vec<RunReport>>,
    failures_left: Mutex<usize>,
}

impl RecordingNotifier {
    fn failing_first(n: usize) -> Arc<Self> {
        let notifier = Self::default();
        *notifier.failures_left.lock() = n;
        Arc::new(notifier)
    }

    fn calls(&self) -> usize {
        self.reports.lock().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, report: &RunReport) -> NotifyResult<Delivery> {
        self.reports.lock().push(report.clone());
        let mut failures = self.failures_left.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(NotifyError::Transport("smtp unavailable".to_string()));
        }
        Ok(Delivery::Sent)
    }
}

fn dev_run(notifier: Arc<RecordingNotifier>) -> TestRun {
    TestRun::new(RunParameters::new(Environment::Dev)).with_notifier(notifier)
}

#[tokio::test]
async fn failing_upload_fails_the_run() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut run = dev_run(notifier.clone());

    run.start_case("Login");
    run.end_case("Login", true, None);
    run.start_case("Upload");
    run.end_case("Upload", false, Some("timeout".to_string()));
    let snapshot = run.mark_passed().await;

    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("Test case 'Upload' failed: timeout")
    );
    let names: Vec<_> = snapshot.cases.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Login", "Upload"]);
    assert_eq!(notifier.calls(), 1);
    assert_eq!(snapshot.parameters.env, Environment::Dev);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["status"], "FAILED");
    assert_eq!(json["parameters"]["env"], "dev");
}

#[tokio::test]
async fn failure_is_sticky_and_first_message_wins() {
    let mut run = dev_run(Arc::new(RecordingNotifier::default()));

    run.end_case("Login", false, Some("bad password".to_string()));
    run.end_case("Upload", false, Some("timeout".to_string()));
    run.end_case("Report", true, None);
    run.end_case("Login", true, None);

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(
        run.error_message(),
        Some("Test case 'Login' failed: bad password")
    );

    let snapshot = run.mark_passed().await;
    assert_eq!(snapshot.status, RunStatus::Failed);
}

#[tokio::test]
async fn second_finalize_keeps_end_time_but_applies_status() {
    let mut run = dev_run(RecordingNotifier::failing_first(usize::MAX));

    let first = run.mark_failed("Error during automation: browser crashed").await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = run.mark_passed().await;

    assert_eq!(first.end_time, second.end_time);
    // mark_passed cannot leave FAILED
    assert_eq!(second.status, RunStatus::Failed);

    let mut run = dev_run(Arc::new(RecordingNotifier::default()));
    let first = run.mark_passed().await;
    let second = run.mark_failed("late failure").await;
    assert_eq!(first.status, RunStatus::Passed);
    assert_eq!(second.status, RunStatus::Failed);
    assert_eq!(second.error_message.as_deref(), Some("late failure"));
    assert_eq!(first.end_time, second.end_time);
}

#[tokio::test]
async fn successful_dispatch_is_not_repeated() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut run = dev_run(notifier.clone());

    run.mark_passed().await;
    run.mark_passed().await;
    run.mark_failed("boom").await;

    assert!(run.is_notified());
    assert_eq!(notifier.calls(), 1);
}

#[tokio::test]
async fn transport_failure_does_not_set_notified() {
    let notifier = RecordingNotifier::failing_first(1);
    let mut run = dev_run(notifier.clone());

    let snapshot = run.mark_passed().await;
    assert_eq!(snapshot.status, RunStatus::Passed);
    assert!(!run.is_notified());

    assert!(run.dispatch_notification().await);
    assert!(run.is_notified());
    assert_eq!(notifier.calls(), 2);
}

#[tokio::test]
async fn report_carries_artifacts_in_capture_order() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut run = dev_run(notifier.clone());

    run.start_case("Login");
    run.add_artifact(b"1".to_vec(), "login_page.png", Some("Login"));
    run.start_case("Upload");
    run.add_artifact(b"2".to_vec(), "upload_form.png", Some("Upload"));
    run.add_artifact(b"3".to_vec(), "after_login.png", Some("Login"));
    run.add_artifact(b"4".to_vec(), "final_error.png", None);
    run.mark_passed().await;

    let reports = notifier.reports.lock();
    let report = &reports[0];
    let filenames: Vec<_> = report.artifacts.iter().map(|a| a.filename.as_str()).collect();
    assert_eq!(
        filenames,
        vec!["login_page.png", "upload_form.png", "after_login.png", "final_error.png"]
    );
    assert_eq!(report.artifacts[1].payload.as_ref(), b"2");
    assert_eq!(
        report.snapshot.cases[0].artifacts,
        vec!["login_page.png", "after_login.png"]
    );
    assert_eq!(report.snapshot.cases[1].artifacts, vec!["upload_form.png"]);
}

#[tokio::test]
async fn ending_an_unstarted_case() {
    let mut run = dev_run(Arc::new(RecordingNotifier::default()));

    let ghost = run.end_case("Ghost", true, None);
    assert_eq!(ghost.status, RunStatus::Passed);
    assert_eq!(Some(ghost.start_time), ghost.end_time);
    assert_eq!(ghost.duration_seconds, Some(0.0));
}

#[tokio::test]
async fn re_ending_a_case_overwrites_it() {
    let mut run = dev_run(Arc::new(RecordingNotifier::default()));

    run.start_case("Login");
    run.end_case("Login", false, Some("first".to_string()));
    let second = run.end_case("Login", true, None);

    assert_eq!(second.status, RunStatus::Passed);
    assert!(second.error_message.is_none());
    // the run still remembers the earlier failure
    assert_eq!(run.status(), RunStatus::Failed);
}

#[tokio::test]
async fn handle_drives_a_run_to_completion() {
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = RunHandle::new(dev_run(notifier.clone()));

    handle.start_case("Login").await;
    handle
        .add_artifact(b"png".to_vec(), "login_page.png", Some("Login"))
        .await;
    handle.end_case("Login", true, None).await;
    assert_eq!(handle.status(), RunStatus::Running);

    let snapshot = handle.mark_passed().await;
    assert_eq!(snapshot.status, RunStatus::Passed);
    assert_eq!(handle.snapshot(), snapshot);
    assert_eq!(handle.artifacts().await.len(), 1);
    assert_eq!(notifier.calls(), 1);
}

#[test]
fn dispatcher_receives_only_valid_recipients() {
    let smtp = SmtpConfig {
        recipients: vec![
            "a@b.com".to_string(),
            "bad-email".to_string(),
            "  c@d.org  ".to_string(),
        ],
        ..Default::default()
    };
    let notifier = EmailNotifier::from_config(&smtp);
    assert_eq!(notifier.recipients(), ["a@b.com", "c@d.org"]);
}
