//! Run output fan-out
//!
//! Every run driver writes into one unbounded channel. A single dispatcher
//! task appends each line to the registry's log buffer and broadcasts it to
//! the run's websocket subscribers.

use flowcheck_common::LogLine;
use flowcheck_driver::{LogSink, RunLog};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::events::RunEvent;
use crate::registry::RunRegistry;

#[derive(Debug)]
enum HubMessage {
    Line(LogLine),
    /// Answered once every earlier message has been dispatched
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct LogHub {
    tx: mpsc::UnboundedSender<HubMessage>,
}

impl LogHub {
    /// Start the dispatcher. It stops once every sender is dropped.
    pub fn spawn(registry: Arc<RunRegistry>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(dispatch(registry, rx));
        (Self { tx }, task)
    }

    /// Run log whose lines flow through this hub
    pub fn run_log(&self, run_id: &str) -> RunLog {
        RunLog::with_sink(run_id, self.clone())
    }

    /// Wait until every line queued so far is in the registry and has been
    /// broadcast
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(HubMessage::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

impl LogSink for LogHub {
    fn push(&self, line: LogLine) {
        // dispatcher gone means nobody is listening
        let _ = self.tx.send(HubMessage::Line(line));
    }
}

async fn dispatch(registry: Arc<RunRegistry>, mut rx: mpsc::UnboundedReceiver<HubMessage>) {
    info!("Log hub started");
    while let Some(message) = rx.recv().await {
        let line = match message {
            HubMessage::Line(line) => line,
            HubMessage::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        if !registry.append_log(&line.run_id, &line.text) {
            debug!("Dropping log line for unknown run {}", line.run_id);
            continue;
        }
        registry.publish(
            &line.run_id,
            RunEvent::LogUpdate {
                test_id: line.run_id.clone(),
                log: line.text,
                stream_type: line.stream,
                timestamp: line.timestamp,
            },
        );
    }
    info!("Log hub stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcheck_common::{LogStream, RunParameters};

    #[tokio::test]
    async fn test_lines_reach_buffer_and_subscribers() {
        let registry = Arc::new(RunRegistry::new());
        let (run_id, _) = registry.create_run(RunParameters::default(), "run");
        let mut rx = registry.subscribe(&run_id).unwrap();

        let (hub, task) = LogHub::spawn(registry.clone());
        let log = hub.run_log(&run_id);
        log.info("Starting Login");
        log.error("Login failed: timeout");
        hub.push(LogLine::new("run_unknown", LogStream::Stdout, "ignored"));

        match rx.recv().await.unwrap() {
            RunEvent::LogUpdate {
                log, stream_type, ..
            } => {
                assert_eq!(log, "Starting Login");
                assert_eq!(stream_type, LogStream::Stdout);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(rx.recv().await.unwrap().name(), "log_update");

        drop(log);
        drop(hub);
        task.await.unwrap();
        assert_eq!(
            registry.logs(&run_id).as_deref(),
            Some("Starting Login\nLogin failed: timeout\n")
        );
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_lines() {
        let registry = Arc::new(RunRegistry::new());
        let (run_id, _) = registry.create_run(RunParameters::default(), "run");
        let (hub, _task) = LogHub::spawn(registry.clone());

        let log = hub.run_log(&run_id);
        for i in 0..50 {
            log.info(format!("line {}", i));
        }
        hub.flush().await;

        let logs = registry.logs(&run_id).unwrap();
        assert_eq!(logs.lines().count(), 50);
        assert!(logs.ends_with("line 49\n"));
    }
}
