//! Shared run handle
//!
//! The driver mutates a run while the control API reads its status. Mutations
//! go through an async mutex; after each one a fresh snapshot is published on
//! a watch channel so readers never wait behind a report dispatch.

use bytes::Bytes;
use flowcheck_common::RunStatus;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::artifact::Artifact;
use crate::case::CaseSnapshot;
use crate::run::{RunSnapshot, TestRun};

#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<Inner>,
}

struct Inner {
    run_id: String,
    run: Mutex<TestRun>,
    snapshot_tx: watch::Sender<RunSnapshot>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.inner.run_id)
            .field("status", &self.status())
            .finish()
    }
}

impl RunHandle {
    pub fn new(run: TestRun) -> Self {
        let (snapshot_tx, _) = watch::channel(run.snapshot());
        Self {
            inner: Arc::new(Inner {
                run_id: run.run_id().to_string(),
                run: Mutex::new(run),
                snapshot_tx,
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> RunSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn status(&self) -> RunStatus {
        self.inner.snapshot_tx.borrow().status
    }

    /// Receive every snapshot published after this call
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    fn publish(&self, run: &TestRun) {
        self.inner.snapshot_tx.send_replace(run.snapshot());
    }

    pub async fn start_case(&self, name: &str) -> CaseSnapshot {
        let mut run = self.inner.run.lock().await;
        let case = run.start_case(name);
        self.publish(&run);
        case
    }

    pub async fn end_case(
        &self,
        name: &str,
        passed: bool,
        error_message: Option<String>,
    ) -> CaseSnapshot {
        let mut run = self.inner.run.lock().await;
        let case = run.end_case(name, passed, error_message);
        self.publish(&run);
        case
    }

    pub async fn add_artifact(
        &self,
        payload: impl Into<Bytes>,
        filename: impl Into<String>,
        case_name: Option<&str>,
    ) -> Arc<Artifact> {
        let mut run = self.inner.run.lock().await;
        let artifact = run.add_artifact(payload, filename, case_name);
        self.publish(&run);
        artifact
    }

    pub async fn mark_passed(&self) -> RunSnapshot {
        let mut run = self.inner.run.lock().await;
        let snapshot = run.record_passed();
        self.inner.snapshot_tx.send_replace(snapshot.clone());
        run.dispatch_notification().await;
        snapshot
    }

    pub async fn mark_failed(&self, error_message: impl Into<String>) -> RunSnapshot {
        let mut run = self.inner.run.lock().await;
        let snapshot = run.record_failed(error_message);
        self.inner.snapshot_tx.send_replace(snapshot.clone());
        run.dispatch_notification().await;
        snapshot
    }

    pub async fn dispatch_notification(&self) -> bool {
        self.inner.run.lock().await.dispatch_notification().await
    }

    pub async fn is_notified(&self) -> bool {
        self.inner.run.lock().await.is_notified()
    }

    pub async fn artifacts(&self) -> Vec<Arc<Artifact>> {
        self.inner.run.lock().await.artifacts().to_vec()
    }
}
