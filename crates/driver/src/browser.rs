//! Browser session seam

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::DriverResult;
use crate::spec::Step;

/// What the browser did with a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutput {
    Completed,
    /// An optional step that did not apply, e.g. a prompt that never appeared
    Skipped(String),
}

/// A live browser page driven one step at a time.
///
/// Implementations only see page-level steps (`navigate`, `click`, `fill`,
/// `upload`, `wait`); the workflow handles sleeps, logs and screenshot
/// bookkeeping itself.
#[async_trait]
pub trait BrowserSession: Send {
    async fn execute(&mut self, step: &Step) -> DriverResult<StepOutput>;

    /// PNG of the current page
    async fn screenshot(&mut self) -> DriverResult<Bytes>;

    async fn close(&mut self) -> DriverResult<()>;
}

/// Opens browser sessions for runs
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> DriverResult<Box<dyn BrowserSession>>;
}
