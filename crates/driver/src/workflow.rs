//! Phase execution against a run
//!
//! Every phase becomes a case. A phase yields an explicit
//! `Result<CaseOutcome, DriverError>` which is fed into `end_case`; a failed
//! phase either lets the next one run (`continue_on_failure`) or aborts the
//! run. Whatever happens, the run is finalized exactly once and the browser
//! session is closed.

use chrono::{DateTime, Local};
use flowcheck_core::{RunHandle, RunSnapshot};
use std::path::PathBuf;
use std::time::Duration;

use crate::browser::{BrowserSession, SessionFactory, StepOutput};
use crate::error::DriverResult;
use crate::log::RunLog;
use crate::spec::{Phase, Step, WorkflowSpec};
use crate::template::TemplateContext;

/// Case name used for screenshots taken outside any phase
pub const OVERALL_CASE: &str = "Overall Test";

/// What a successful phase did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseOutcome {
    pub phase: String,
    pub steps_completed: usize,
    pub steps_skipped: usize,
    pub screenshots: Vec<String>,
}

/// `<name>_<YYYYmmdd_HHMMSS>.png`, suffixed with a counter when that name
/// was already captured in the same second
pub fn screenshot_filename(existing: &[String], name: &str, at: DateTime<Local>) -> String {
    let base = format!("{}_{}", name, at.format("%Y%m%d_%H%M%S"));
    let first = format!("{}.png", base);
    if !existing.contains(&first) {
        return first;
    }
    (2..)
        .map(|n| format!("{}_{}.png", base, n))
        .find(|candidate| !existing.contains(candidate))
        .unwrap_or(first)
}

pub struct Workflow {
    spec: WorkflowSpec,
    context: TemplateContext,
    screenshots_dir: Option<PathBuf>,
}

impl Workflow {
    pub fn new(spec: WorkflowSpec, context: TemplateContext) -> Self {
        Self {
            spec,
            context,
            screenshots_dir: None,
        }
    }

    /// Also write every screenshot to `dir`
    pub fn save_screenshots_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshots_dir = Some(dir.into());
        self
    }

    pub fn spec(&self) -> &WorkflowSpec {
        &self.spec
    }

    /// Open a session, execute, close the session
    pub async fn run(
        &self,
        factory: &dyn SessionFactory,
        handle: &RunHandle,
        log: &RunLog,
    ) -> RunSnapshot {
        log.info(format!(
            "Starting workflow '{}' with run ID: {}",
            self.spec.name,
            handle.run_id()
        ));

        let mut session = match factory.open().await {
            Ok(session) => session,
            Err(e) => {
                let message = format!("Error during automation: {}", e);
                log.error(&message);
                return handle.mark_failed(message).await;
            }
        };

        let snapshot = self.execute(session.as_mut(), handle, log).await;

        match session.close().await {
            Ok(()) => log.info("Browser session closed"),
            Err(e) => log.error(format!("Error closing browser session: {}", e)),
        }
        snapshot
    }

    /// Run every phase on an open session and finalize the run
    pub async fn execute(
        &self,
        session: &mut dyn BrowserSession,
        handle: &RunHandle,
        log: &RunLog,
    ) -> RunSnapshot {
        match self.run_phases(session, handle, log).await {
            Ok(()) => {
                log.info(format!("Workflow '{}' completed", self.spec.name));
                handle.mark_passed().await
            }
            Err(e) => {
                let message = format!("Error during automation: {}", e);
                log.error(&message);
                self.capture(session, handle, log, "final_error", Some(OVERALL_CASE))
                    .await;
                handle.mark_failed(message).await
            }
        }
    }

    async fn run_phases(
        &self,
        session: &mut dyn BrowserSession,
        handle: &RunHandle,
        log: &RunLog,
    ) -> DriverResult<()> {
        for phase in &self.spec.phases {
            handle.start_case(&phase.name).await;
            log.info(format!("Starting {}", phase.name));

            match self.run_phase(phase, session, handle, log).await {
                Ok(outcome) => {
                    handle.end_case(&phase.name, true, None).await;
                    log.info(format!(
                        "{} passed ({} step(s), {} skipped)",
                        outcome.phase, outcome.steps_completed, outcome.steps_skipped
                    ));
                }
                Err(e) => {
                    let message = format!("{} failed: {}", phase.name, e);
                    log.error(&message);
                    let shot = format!("{}_error", phase.slug());
                    self.capture(session, handle, log, &shot, Some(&phase.name))
                        .await;
                    handle.end_case(&phase.name, false, Some(message)).await;

                    if !phase.continue_on_failure {
                        return Err(e);
                    }
                    log.info(format!(
                        "Continuing with remaining phases despite {} failure",
                        phase.name
                    ));
                }
            }
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        phase: &Phase,
        session: &mut dyn BrowserSession,
        handle: &RunHandle,
        log: &RunLog,
    ) -> DriverResult<CaseOutcome> {
        let mut outcome = CaseOutcome {
            phase: phase.name.clone(),
            ..Default::default()
        };

        for step in &phase.steps {
            let step = step.render(&self.context)?;
            match &step {
                Step::Sleep { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
                Step::Log { message } => log.info(message.as_str()),
                Step::Screenshot { name } => {
                    // screenshots never fail a phase
                    if let Some(filename) =
                        self.capture(session, handle, log, name, Some(&phase.name)).await
                    {
                        outcome.screenshots.push(filename);
                    }
                }
                _ => {
                    if let StepOutput::Skipped(reason) = session.execute(&step).await? {
                        log.info(format!("Skipped {}: {}", step.describe(), reason));
                        outcome.steps_skipped += 1;
                        continue;
                    }
                }
            }
            outcome.steps_completed += 1;
        }

        Ok(outcome)
    }

    /// Best-effort screenshot attached to the run and `case`
    async fn capture(
        &self,
        session: &mut dyn BrowserSession,
        handle: &RunHandle,
        log: &RunLog,
        name: &str,
        case: Option<&str>,
    ) -> Option<String> {
        let payload = match session.screenshot().await {
            Ok(payload) => payload,
            Err(e) => {
                log.error(format!("Error taking screenshot '{}': {}", name, e));
                return None;
            }
        };

        let filename = screenshot_filename(&handle.snapshot().artifacts, name, Local::now());
        handle
            .add_artifact(payload.clone(), filename.clone(), case)
            .await;
        log.info(format!("Screenshot captured: {}", filename));

        if let Some(dir) = &self.screenshots_dir {
            let path = dir.join(&filename);
            let written = async {
                tokio::fs::create_dir_all(dir).await?;
                tokio::fs::write(&path, &payload).await
            }
            .await;
            match written {
                Ok(()) => log.info(format!("Screenshot also saved to disk: {}", path.display())),
                Err(e) => log.error(format!("Error saving screenshot {}: {}", path.display(), e)),
            }
        }

        Some(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_screenshot_filename_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            screenshot_filename(&[], "login_page", at),
            "login_page_20240309_140507.png"
        );
    }

    #[test]
    fn test_screenshot_filename_dedup() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let existing = vec![
            "login_page_20240309_140507.png".to_string(),
            "login_page_20240309_140507_2.png".to_string(),
        ];
        assert_eq!(
            screenshot_filename(&existing, "login_page", at),
            "login_page_20240309_140507_3.png"
        );
    }
}
