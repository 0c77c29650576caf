//! Flowcheck workflow driver
//!
//! Drives the application under test through a browser, one declarative
//! phase at a time, and feeds the outcome of every phase into a run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Workflow                                                   │
//! │    ├── run(factory, handle, log) -> RunSnapshot             │
//! │    └── per phase: start_case → steps → end_case             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WorkflowSpec (YAML)                                        │
//! │    └── phases: [Phase { name, continue_on_failure, steps }] │
//! │          ├── navigate { url, wait_for_selector? }           │
//! │          ├── click { selector, timeout_ms?, optional }      │
//! │          ├── fill / upload / wait / sleep                   │
//! │          └── screenshot { name } / log { message }          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserSession                                             │
//! │    └── PlaywrightSession (node bridge, JSON lines)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod error;
pub mod log;
pub mod playwright;
pub mod spec;
pub mod template;
pub mod workflow;

pub use browser::{BrowserSession, SessionFactory, StepOutput};
pub use error::{DriverError, DriverResult};
pub use log::{LogSink, RunLog};
pub use playwright::{Browser, PlaywrightConfig, PlaywrightFactory, PlaywrightSession};
pub use spec::{Phase, Step, Viewport, WaitState, WorkflowSpec};
pub use template::TemplateContext;
pub use workflow::{screenshot_filename, CaseOutcome, Workflow, OVERALL_CASE};
