//! Background run execution
//!
//! `Launcher::start` registers a run and spawns its task. The task announces
//! the start, drives the workflow, persists the final snapshot, records the
//! execution state and announces the end to websocket subscribers and the
//! run's webhook.

use flowcheck_common::{AppConfig, RunParameters};
use flowcheck_core::{ResultStore, RunHandle, RunSnapshot};
use flowcheck_driver::{
    PlaywrightConfig, PlaywrightFactory, RunLog, SessionFactory, TemplateContext, Workflow,
    WorkflowSpec,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::events::{ExecutionState, RunEvent};
use crate::loghub::LogHub;
use crate::registry::RunRegistry;
use crate::webhook::{WebhookConfig, WebhookSender};

/// Check the target environment and bind the workflow to one run
pub fn prepare_workflow(
    config: &AppConfig,
    spec: &WorkflowSpec,
    run_id: &str,
    parameters: &RunParameters,
) -> anyhow::Result<Workflow> {
    let env = config.environment(parameters.env);
    env.validate()?;

    let context = TemplateContext::for_run(run_id, env, parameters, &config.defaults);
    let mut workflow = Workflow::new(spec.clone(), context);
    if config.save_screenshots_to_disk {
        workflow = workflow.save_screenshots_to(&config.screenshots_dir);
    }
    Ok(workflow)
}

/// Browser sessions sized for the workflow's viewport
pub fn playwright_factory(config: &AppConfig, spec: &WorkflowSpec) -> PlaywrightFactory {
    PlaywrightFactory::new(PlaywrightConfig {
        node_binary: config.node_binary.clone(),
        viewport: spec.viewport,
        ..Default::default()
    })
}

#[derive(Clone)]
pub struct Launcher {
    config: Arc<AppConfig>,
    workflow: Arc<WorkflowSpec>,
    factory: Arc<dyn SessionFactory>,
    registry: Arc<RunRegistry>,
    store: ResultStore,
    hub: LogHub,
    webhooks: WebhookSender,
}

impl Launcher {
    pub fn new(
        config: Arc<AppConfig>,
        workflow: Arc<WorkflowSpec>,
        factory: Arc<dyn SessionFactory>,
        registry: Arc<RunRegistry>,
        store: ResultStore,
        hub: LogHub,
    ) -> Self {
        Self {
            config,
            workflow,
            factory,
            registry,
            store,
            hub,
            webhooks: WebhookSender::new(),
        }
    }

    pub fn with_webhook_sender(mut self, webhooks: WebhookSender) -> Self {
        self.webhooks = webhooks;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn webhooks(&self) -> &WebhookSender {
        &self.webhooks
    }

    /// Register a run and execute it in the background
    pub fn start(
        &self,
        parameters: RunParameters,
        prefix: &str,
        webhook: Option<WebhookConfig>,
    ) -> String {
        let (run_id, handle) = self.registry.create_run(parameters, prefix);
        if let Some(webhook) = webhook {
            self.registry.set_webhook(&run_id, webhook);
        }

        info!("Starting test {}", run_id);
        let launcher = self.clone();
        let task_id = run_id.clone();
        tokio::spawn(async move {
            launcher.execute(&task_id, handle).await;
        });

        run_id
    }

    /// Body of a run task
    pub async fn execute(&self, run_id: &str, handle: RunHandle) -> RunSnapshot {
        let start_time = handle.snapshot().start_time;
        self.emit(
            run_id,
            RunEvent::TestStarted {
                test_id: run_id.to_string(),
                status: ExecutionState::Running,
                start_time,
            },
        )
        .await;

        let log = self.hub.run_log(run_id);
        let (snapshot, error) = match self.drive(run_id, &handle, &log).await {
            Ok(snapshot) => (snapshot, None),
            Err(e) => {
                let message = format!("Error during automation: {}", e);
                log.error(&message);
                (handle.mark_failed(message).await, Some(e.to_string()))
            }
        };

        match self.store.save(&snapshot).await {
            Ok(path) => info!("Test results saved to {}", path.display()),
            Err(e) => error!("Error saving test results for {}: {}", run_id, e),
        }

        let state = if error.is_some() {
            ExecutionState::Error
        } else {
            ExecutionState::Completed
        };
        // trailing log lines go out before the end event
        self.hub.flush().await;
        if let Some(finished) = self.registry.finish(run_id, state, error) {
            self.registry.publish(run_id, finished.event.clone());
            if let Some(webhook) = finished.webhook {
                self.webhooks.send(&webhook, run_id, &finished.event).await;
            }
        }

        info!("Test {} completed with status: {}", run_id, snapshot.status);
        snapshot
    }

    async fn drive(
        &self,
        run_id: &str,
        handle: &RunHandle,
        log: &RunLog,
    ) -> anyhow::Result<RunSnapshot> {
        let parameters = handle.snapshot().parameters;
        let env = self.config.environment(parameters.env);

        log.info(format!(
            "Test {} using environment: {}",
            run_id, parameters.env
        ));
        for line in env.summary().lines() {
            log.info(format!("  {}", line));
        }

        let workflow = prepare_workflow(&self.config, &self.workflow, run_id, &parameters)?;
        Ok(workflow.run(self.factory.as_ref(), handle, log).await)
    }

    /// Broadcast to subscribers and deliver to the run's webhook
    pub async fn emit(&self, run_id: &str, event: RunEvent) {
        self.registry.publish(run_id, event.clone());
        if let Some(webhook) = self.registry.webhook(run_id) {
            self.webhooks.send(&webhook, run_id, &event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcheck_common::{Environment, EnvironmentConfig};

    const SPEC: &str = r#"
name: smoke
phases:
  - name: Login
    steps:
      - action: navigate
        url: "{{base_url}}"
"#;

    #[test]
    fn test_prepare_requires_login_settings() {
        let config = AppConfig::default();
        let spec = WorkflowSpec::from_yaml(SPEC).unwrap();
        let err = prepare_workflow(&config, &spec, "run_1", &RunParameters::new(Environment::Prod))
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Missing required configuration: BASE_URL, LOGIN_EMAIL, LOGIN_PASSWORD"
        );
    }

    #[test]
    fn test_prepare_binds_environment() {
        let mut config = AppConfig::default();
        config.staging = EnvironmentConfig {
            base_url: Some("https://staging.example.com".to_string()),
            login_email: Some("qa@example.com".to_string()),
            login_password: Some("secret".to_string()),
            ..Default::default()
        };
        let spec = WorkflowSpec::from_yaml(SPEC).unwrap();
        let workflow =
            prepare_workflow(&config, &spec, "run_1", &RunParameters::new(Environment::Staging))
                .unwrap();
        assert_eq!(workflow.spec().name, "smoke");
    }
}
