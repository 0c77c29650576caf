//! In-memory registry of runs started by this process
//!
//! Each entry owns the shared `RunHandle`, the execution state, the
//! accumulated log text, an optional webhook and the broadcast channel that
//! websocket subscribers listen on.

use chrono::{DateTime, Utc};
use flowcheck_common::RunParameters;
use flowcheck_core::run::generate_run_id;
use flowcheck_core::{NoopNotifier, Notifier, RunHandle, RunSnapshot, TestRun};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::{ExecutionState, RunEvent};
use crate::webhook::WebhookConfig;

const EVENT_CAPACITY: usize = 256;

type NotifierSource = Box<dyn Fn(&RunParameters) -> Arc<dyn Notifier> + Send + Sync>;

struct RunEntry {
    handle: RunHandle,
    state: ExecutionState,
    logs: String,
    error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
    webhook: Option<WebhookConfig>,
    events: broadcast::Sender<RunEvent>,
}

/// Point-in-time view of one entry
#[derive(Debug, Clone, Serialize)]
pub struct RunView {
    pub test_id: String,
    pub state: ExecutionState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub logs: String,
    pub error: Option<String>,
    pub has_webhook: bool,
    pub snapshot: RunSnapshot,
}

impl RunView {
    /// Completion or error event for a finished entry
    pub fn finished_event(&self) -> Option<RunEvent> {
        let result = Box::new(self.snapshot.clone());
        match self.state {
            ExecutionState::Running => None,
            ExecutionState::Completed => Some(RunEvent::TestCompleted {
                test_id: self.test_id.clone(),
                status: self.state,
                start_time: self.start_time,
                end_time: self.end_time,
                result,
            }),
            ExecutionState::Error => Some(RunEvent::TestError {
                test_id: self.test_id.clone(),
                status: self.state,
                start_time: self.start_time,
                end_time: self.end_time,
                error: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
                result: Some(result),
            }),
        }
    }
}

/// End of a run as recorded by [`RunRegistry::finish`]
#[derive(Debug, Clone)]
pub struct FinishedRun {
    pub event: RunEvent,
    /// Webhook registered when the run finished. Later registrations are
    /// answered by [`RunRegistry::set_webhook`] instead.
    pub webhook: Option<WebhookConfig>,
}

/// Outcome of attaching a webhook to a live run
#[derive(Debug, Clone)]
pub enum WebhookAttach {
    /// The run's own end event will reach the webhook
    Pending,
    /// The run had already finished; the caller delivers this event
    Finished(RunEvent),
}

pub struct RunRegistry {
    runs: RwLock<HashMap<String, RunEntry>>,
    notifiers: NotifierSource,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRegistry {
    /// Registry whose runs never send reports
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            notifiers: Box::new(|_| Arc::new(NoopNotifier)),
        }
    }

    /// Pick the report notifier for each new run from its parameters
    pub fn with_notifiers<F>(mut self, source: F) -> Self
    where
        F: Fn(&RunParameters) -> Arc<dyn Notifier> + Send + Sync + 'static,
    {
        self.notifiers = Box::new(source);
        self
    }

    /// Register a new run under a fresh `<prefix>_<hex>` id
    pub fn create_run(&self, parameters: RunParameters, prefix: &str) -> (String, RunHandle) {
        let notifier = (self.notifiers)(&parameters);
        let mut runs = self.runs.write();

        let mut run_id = generate_run_id(prefix);
        while runs.contains_key(&run_id) {
            run_id = generate_run_id(prefix);
        }

        let run = TestRun::with_id(run_id.clone(), parameters).with_notifier(notifier);
        let handle = RunHandle::new(run);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        runs.insert(
            run_id.clone(),
            RunEntry {
                handle: handle.clone(),
                state: ExecutionState::Running,
                logs: String::new(),
                error: None,
                finished_at: None,
                webhook: None,
                events,
            },
        );
        debug!("Registered run {}", run_id);

        (run_id, handle)
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.runs.read().contains_key(run_id)
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }

    pub fn handle(&self, run_id: &str) -> Option<RunHandle> {
        self.runs.read().get(run_id).map(|e| e.handle.clone())
    }

    pub fn get_snapshot(&self, run_id: &str) -> Option<RunSnapshot> {
        self.runs.read().get(run_id).map(|e| e.handle.snapshot())
    }

    pub fn state(&self, run_id: &str) -> Option<ExecutionState> {
        self.runs.read().get(run_id).map(|e| e.state)
    }

    pub fn logs(&self, run_id: &str) -> Option<String> {
        self.runs.read().get(run_id).map(|e| e.logs.clone())
    }

    pub fn view(&self, run_id: &str) -> Option<RunView> {
        self.runs
            .read()
            .get(run_id)
            .map(|entry| Self::view_of(run_id, entry))
    }

    /// All entries, oldest first
    pub fn list(&self) -> Vec<RunView> {
        let mut views: Vec<RunView> = self
            .runs
            .read()
            .iter()
            .map(|(id, entry)| Self::view_of(id, entry))
            .collect();
        views.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        views
    }

    fn view_of(run_id: &str, entry: &RunEntry) -> RunView {
        let snapshot = entry.handle.snapshot();
        RunView {
            test_id: run_id.to_string(),
            state: entry.state,
            start_time: snapshot.start_time,
            end_time: entry.finished_at,
            logs: entry.logs.clone(),
            error: entry.error.clone(),
            has_webhook: entry.webhook.is_some(),
            snapshot,
        }
    }

    /// Append one line of run output; false when the run is unknown
    pub fn append_log(&self, run_id: &str, text: &str) -> bool {
        match self.runs.write().get_mut(run_id) {
            Some(entry) => {
                entry.logs.push_str(text);
                if !text.ends_with('\n') {
                    entry.logs.push('\n');
                }
                true
            }
            None => false,
        }
    }

    /// Attach a webhook; `None` when the run is unknown
    pub fn set_webhook(&self, run_id: &str, webhook: WebhookConfig) -> Option<WebhookAttach> {
        let mut runs = self.runs.write();
        let entry = runs.get_mut(run_id)?;
        entry.webhook = Some(webhook);
        Some(match Self::view_of(run_id, entry).finished_event() {
            Some(event) => WebhookAttach::Finished(event),
            None => WebhookAttach::Pending,
        })
    }

    pub fn webhook(&self, run_id: &str) -> Option<WebhookConfig> {
        self.runs.read().get(run_id).and_then(|e| e.webhook.clone())
    }

    /// Record the end of execution. Only the first call takes effect.
    pub fn finish(
        &self,
        run_id: &str,
        state: ExecutionState,
        error: Option<String>,
    ) -> Option<FinishedRun> {
        let mut runs = self.runs.write();
        let entry = runs.get_mut(run_id)?;
        if entry.state.is_finished() {
            return None;
        }
        entry.state = state;
        entry.error = error;
        entry.finished_at = Some(Utc::now());

        let event = Self::view_of(run_id, entry).finished_event()?;
        Some(FinishedRun {
            event,
            webhook: entry.webhook.clone(),
        })
    }

    pub fn subscribe(&self, run_id: &str) -> Option<broadcast::Receiver<RunEvent>> {
        self.runs.read().get(run_id).map(|e| e.events.subscribe())
    }

    /// Fan an event out to the run's subscribers; returns how many got it
    pub fn publish(&self, run_id: &str, event: RunEvent) -> usize {
        match self.runs.read().get(run_id) {
            // no subscribers is not an error
            Some(entry) => entry.events.send(event).unwrap_or(0),
            None => 0,
        }
    }
}
