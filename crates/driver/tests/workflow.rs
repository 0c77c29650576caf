//! Workflow execution against a scripted browser

use async_trait::async_trait;
use bytes::Bytes;
use flowcheck_common::{DefaultPaths, Environment, EnvironmentConfig, RunParameters, RunStatus};
use flowcheck_core::{RunHandle, TestRun};
use flowcheck_driver::{
    BrowserSession, DriverError, DriverResult, RunLog, SessionFactory, Step, StepOutput,
    TemplateContext, Workflow, WorkflowSpec, OVERALL_CASE,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

const WORKFLOW: &str = r##"
name: case-lifecycle
phases:
  - name: Login
    steps:
      - action: navigate
        url: "{{base_url}}"
      - action: screenshot
        name: login_page
      - action: fill
        selector: "input[name=loginfmt]"
        value: "{{login_email}}"
      - action: click
        selector: "#stay-signed-in"
        timeout_ms: 100
        optional: true
      - action: wait
        selector: ".dt-buttons"
  - name: Case Creation
    steps:
      - action: fill
        selector: "#title"
        value: "{{case.title}}"
      - action: click
        selector: "#new-case-submit"
  - name: Clinical Notes Upload
    continue_on_failure: true
    steps:
      - action: upload
        selector: "#upload-input"
        path: "{{notes_folder_path}}"
  - name: Medical Chronology
    steps:
      - action: log
        message: "Creating chronology"
      - action: click
        selector: "#tab-chrono"
"##;

#[derive(Default)]
struct Script {
    fail: HashSet<String>,
    skip: HashSet<String>,
    screenshot_fails: bool,
    executed: Vec<Step>,
    closed: usize,
}

#[derive(Clone, Default)]
struct FakeBrowser {
    script: Arc<Mutex<Script>>,
}

impl FakeBrowser {
    fn failing(selectors: &[&str]) -> Self {
        let browser = Self::default();
        browser.script.lock().fail = selectors.iter().map(|s| s.to_string()).collect();
        browser
    }

    fn selector(step: &Step) -> Option<&str> {
        match step {
            Step::Click { selector, .. }
            | Step::Fill { selector, .. }
            | Step::Upload { selector, .. }
            | Step::Wait { selector, .. } => Some(selector),
            _ => None,
        }
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn execute(&mut self, step: &Step) -> DriverResult<StepOutput> {
        let mut script = self.script.lock();
        script.executed.push(step.clone());
        if let Some(selector) = Self::selector(step) {
            if script.fail.contains(selector) {
                return Err(DriverError::Timeout(selector.to_string()));
            }
            if script.skip.contains(selector) {
                return Ok(StepOutput::Skipped("prompt not shown".to_string()));
            }
        }
        Ok(StepOutput::Completed)
    }

    async fn screenshot(&mut self) -> DriverResult<Bytes> {
        if self.script.lock().screenshot_fails {
            return Err(DriverError::Bridge("page crashed".to_string()));
        }
        Ok(Bytes::from_static(b"\x89PNG"))
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.script.lock().closed += 1;
        Ok(())
    }
}

struct FakeFactory {
    browser: Option<FakeBrowser>,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self) -> DriverResult<Box<dyn BrowserSession>> {
        match &self.browser {
            Some(browser) => Ok(Box::new(browser.clone())),
            None => Err(DriverError::BridgeStartup("node not found".to_string())),
        }
    }
}

fn setup() -> (Workflow, RunHandle, RunLog) {
    let spec = WorkflowSpec::from_yaml(WORKFLOW).unwrap();
    let env = EnvironmentConfig {
        base_url: Some("https://app.example.com".to_string()),
        login_email: Some("qa@example.com".to_string()),
        login_password: Some("secret".to_string()),
        ..Default::default()
    };
    let params = RunParameters::new(Environment::Dev);
    let run = TestRun::with_id("run_feedbeef", params.clone());
    let ctx = TemplateContext::for_run(run.run_id(), &env, &params, &DefaultPaths::default());
    let handle = RunHandle::new(run);
    let log = RunLog::detached(handle.run_id());
    (Workflow::new(spec, ctx), handle, log)
}

#[tokio::test]
async fn all_phases_pass() {
    let (workflow, handle, log) = setup();
    let browser = FakeBrowser::default();
    browser.script.lock().skip.insert("#stay-signed-in".to_string());
    let factory = FakeFactory {
        browser: Some(browser.clone()),
    };

    let snapshot = workflow.run(&factory, &handle, &log).await;

    assert_eq!(snapshot.status, RunStatus::Passed);
    let names: Vec<_> = snapshot.cases.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Login", "Case Creation", "Clinical Notes Upload", "Medical Chronology"]
    );
    assert!(snapshot.cases.iter().all(|c| c.status == RunStatus::Passed));
    assert_eq!(snapshot.cases[0].artifact_count, 1);
    assert!(snapshot.cases[0].artifacts[0].starts_with("login_page_"));

    let script = browser.script.lock();
    assert_eq!(script.closed, 1);
    assert_eq!(
        script.executed[0],
        Step::Navigate {
            url: "https://app.example.com".to_string(),
            wait_for_selector: None,
        }
    );
    // templated case title falls back to the placeholder
    assert!(script.executed.iter().any(|s| matches!(
        s,
        Step::Fill { selector, value } if selector == "#title" && value.contains("run_feedbeef")
    )));
}

#[tokio::test]
async fn tolerated_failure_fails_run_but_continues() {
    let (workflow, handle, log) = setup();
    let browser = FakeBrowser::failing(&["#upload-input"]);
    let factory = FakeFactory {
        browser: Some(browser.clone()),
    };

    let snapshot = workflow.run(&factory, &handle, &log).await;

    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(snapshot.cases.len(), 4);
    let upload = &snapshot.cases[2];
    assert_eq!(upload.status, RunStatus::Failed);
    assert_eq!(
        upload.error_message.as_deref(),
        Some("Clinical Notes Upload failed: Timeout waiting for: #upload-input")
    );
    assert!(upload.artifacts[0].starts_with("clinical_notes_upload_error_"));
    assert_eq!(snapshot.cases[3].status, RunStatus::Passed);
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("Test case 'Clinical Notes Upload' failed: Clinical Notes Upload failed: Timeout waiting for: #upload-input")
    );
}

#[tokio::test]
async fn required_failure_aborts_run() {
    let (workflow, handle, log) = setup();
    let browser = FakeBrowser::failing(&["#new-case-submit"]);
    let factory = FakeFactory {
        browser: Some(browser.clone()),
    };

    let snapshot = workflow.run(&factory, &handle, &log).await;

    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(snapshot.cases.len(), 2);
    assert_eq!(snapshot.cases[1].status, RunStatus::Failed);
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("Error during automation: Timeout waiting for: #new-case-submit")
    );
    assert!(snapshot
        .artifacts
        .last()
        .map(|f| f.starts_with("final_error_"))
        .unwrap_or(false));
    assert!(snapshot.end_time.is_some());
    // no case is named after the overall bucket, so final_error is run-level only
    assert!(snapshot.cases.iter().all(|c| c.name != OVERALL_CASE));
    assert!(snapshot.cases[1].artifacts[0].starts_with("case_creation_error_"));
    assert_eq!(browser.script.lock().closed, 1);
}

#[tokio::test]
async fn unknown_template_key_fails_phase() {
    let yaml = r#"
name: broken
phases:
  - name: Login
    steps:
      - action: navigate
        url: "{{missing_key}}"
"#;
    let (_, handle, log) = setup();
    let workflow = Workflow::new(WorkflowSpec::from_yaml(yaml).unwrap(), TemplateContext::new());
    let browser = FakeBrowser::default();
    let factory = FakeFactory {
        browser: Some(browser.clone()),
    };

    let snapshot = workflow.run(&factory, &handle, &log).await;

    assert_eq!(snapshot.status, RunStatus::Failed);
    let message = snapshot.cases[0].error_message.as_deref().unwrap();
    assert!(message.contains("Template error"));
    assert!(message.contains("missing_key"));
    assert!(browser.script.lock().executed.is_empty());
}

#[tokio::test]
async fn screenshot_errors_are_not_fatal() {
    let (workflow, handle, log) = setup();
    let browser = FakeBrowser::default();
    browser.script.lock().screenshot_fails = true;
    let factory = FakeFactory {
        browser: Some(browser),
    };

    let snapshot = workflow.run(&factory, &handle, &log).await;
    assert_eq!(snapshot.status, RunStatus::Passed);
    assert_eq!(snapshot.artifact_count, 0);
}

#[tokio::test]
async fn session_start_failure_finalizes_run() {
    let (workflow, handle, log) = setup();
    let factory = FakeFactory { browser: None };

    let snapshot = workflow.run(&factory, &handle, &log).await;

    assert_eq!(snapshot.status, RunStatus::Failed);
    assert!(snapshot.cases.is_empty());
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("Error during automation: Browser bridge failed to start: node not found")
    );
}

#[tokio::test]
async fn screenshots_saved_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (workflow, handle, log) = setup();
    let workflow = workflow.save_screenshots_to(dir.path());
    let factory = FakeFactory {
        browser: Some(FakeBrowser::default()),
    };

    let snapshot = workflow.run(&factory, &handle, &log).await;
    let saved = dir.path().join(&snapshot.artifacts[0]);
    assert_eq!(std::fs::read(saved).unwrap(), b"\x89PNG");
}
