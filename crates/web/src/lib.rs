//! Flowcheck control API
//!
//! Starts workflow runs in the background and reports on them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Router (axum)                                              │
//! │    ├── POST /api/run-test, /api/github-webhook              │
//! │    ├── GET  /api/test-status/:id, /api/active-tests         │
//! │    ├── GET  /api/test-results[/:id]                         │
//! │    ├── POST /api/test-webhook/:id                           │
//! │    └── GET  /ws/test-logs/:id                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Launcher                                                   │
//! │    └── spawn: workflow → ResultStore → events               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RunRegistry          LogHub              WebhookSender     │
//! │    RunHandle, state     mpsc → logs +       reqwest POST    │
//! │    logs, broadcast      broadcast                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod events;
pub mod loghub;
pub mod registry;
pub mod runner;
pub mod server;
pub mod webhook;

pub use error::{ApiError, ApiResult};
pub use events::{ExecutionState, RunEvent, WebhookPayload};
pub use loghub::LogHub;
pub use registry::{FinishedRun, RunRegistry, RunView, WebhookAttach};
pub use runner::{playwright_factory, prepare_workflow, Launcher};
pub use server::{build_state, router, serve, AppState, RunTestRequest};
pub use webhook::{WebhookConfig, WebhookSender};
