//! Flowcheck run core
//!
//! Tracks one end-to-end workflow run as a hierarchy of named cases, collects
//! screenshots, aggregates pass/fail status and dispatches the results report
//! at most once.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RunHandle (shared by driver + control API)                 │
//! │    ├── Mutex<TestRun>        mutations, finalize            │
//! │    └── watch<RunSnapshot>    race-free status reads         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRun                                                    │
//! │    ├── cases: [TestCase]     insertion ordered              │
//! │    ├── artifacts: ArtifactStore                             │
//! │    └── notifier: Arc<dyn Notifier>   (EmailNotifier, ...)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod case;
pub mod error;
pub mod handle;
pub mod notify;
pub mod run;
pub mod store;

pub use artifact::{Artifact, ArtifactStore};
pub use case::{CaseSnapshot, TestCase};
pub use error::{NotifyError, NotifyResult};
pub use handle::RunHandle;
pub use notify::{Delivery, EmailNotifier, NoopNotifier, Notifier, RunReport};
pub use run::{RunSnapshot, TestRun};
pub use store::{ResultStore, RunSummary};
