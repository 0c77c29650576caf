//! Per-run progress log
//!
//! Lines go to tracing and, when a sink is attached, to the log hub that
//! feeds status polling and websocket subscribers.

use flowcheck_common::{LogLine, LogStream};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Destination for run output lines
pub trait LogSink: Debug + Send + Sync {
    /// Hand over one line. A sink with nobody listening drops it.
    fn push(&self, line: LogLine);
}

impl LogSink for mpsc::UnboundedSender<LogLine> {
    fn push(&self, line: LogLine) {
        let _ = self.send(line);
    }
}

#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    sink: Option<Arc<dyn LogSink>>,
}

impl RunLog {
    /// Log to tracing only
    pub fn detached(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            sink: None,
        }
    }

    pub fn with_sink(run_id: impl Into<String>, sink: impl LogSink + 'static) -> Self {
        Self {
            run_id: run_id.into(),
            sink: Some(Arc::new(sink)),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn info(&self, text: impl Into<String>) {
        let text = text.into();
        info!(run_id = %self.run_id, "{}", text);
        self.push(LogStream::Stdout, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        warn!(run_id = %self.run_id, "{}", text);
        self.push(LogStream::Stderr, text);
    }

    fn push(&self, stream: LogStream, text: String) {
        if let Some(sink) = &self.sink {
            sink.push(LogLine::new(&self.run_id, stream, text));
        }
    }
}
