//! Results report delivery
//!
//! A finalized run hands a [`RunReport`] to a [`Notifier`]. Implementations
//! return [`Delivery::Skipped`] when they have nothing to deliver through
//! (no recipients, no server) and an error when the transport fails; the run
//! treats both as non-fatal.

mod email;
mod recipients;

pub use email::{render_html, EmailNotifier};
pub use recipients::{is_valid_address, valid_recipients};

use async_trait::async_trait;
use flowcheck_common::RunStatus;
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::error::NotifyResult;
use crate::run::RunSnapshot;

/// Everything a notifier needs about a finalized run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub snapshot: RunSnapshot,
    pub artifacts: Vec<Arc<Artifact>>,
}

/// Outcome of a delivery attempt that did not error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Skipped(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, report: &RunReport) -> NotifyResult<Delivery>;
}

/// Notifier that never sends anything
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn deliver(&self, _report: &RunReport) -> NotifyResult<Delivery> {
        Ok(Delivery::Skipped("notifications disabled".to_string()))
    }
}
