//! Declarative YAML workflow definition
//!
//! A workflow is an ordered list of phases. Each phase becomes one case of the
//! run and holds the browser steps that make it up.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{DriverError, DriverResult};
use crate::template::TemplateContext;

/// A complete workflow parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_viewport")]
    pub viewport: Viewport,

    pub phases: Vec<Phase>,
}

fn default_viewport() -> Viewport {
    Viewport {
        width: 1920,
        height: 1080,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// One named phase; reported as a case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,

    /// Keep going with the next phase when this one fails
    #[serde(default)]
    pub continue_on_failure: bool,

    pub steps: Vec<Step>,
}

impl Phase {
    /// `Clinical Notes Upload` -> `clinical_notes_upload`
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

pub(crate) fn slugify(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// A single browser step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load a URL
    Navigate {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_for_selector: Option<String>,
    },

    /// Click an element. An optional click that times out is skipped.
    Click {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(default)]
        optional: bool,
    },

    Fill {
        selector: String,
        value: String,
    },

    /// Hand a file or folder path to a file input
    Upload {
        selector: String,
        path: String,
    },

    /// Wait for an element to reach a state
    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    Sleep {
        ms: u64,
    },

    /// Capture the page and attach it to the current phase
    Screenshot {
        name: String,
    },

    Log {
        message: String,
    },
}

fn default_wait_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl Step {
    /// Short label used in logs and failure messages
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate { url, .. } => format!("navigate:{}", url),
            Step::Click { selector, .. } => format!("click:{}", selector),
            Step::Fill { selector, .. } => format!("fill:{}", selector),
            Step::Upload { selector, .. } => format!("upload:{}", selector),
            Step::Wait { selector, .. } => format!("wait:{}", selector),
            Step::Sleep { ms } => format!("sleep:{}ms", ms),
            Step::Screenshot { name } => format!("screenshot:{}", name),
            Step::Log { message } => {
                let end = message
                    .char_indices()
                    .nth(30)
                    .map(|(i, _)| i)
                    .unwrap_or(message.len());
                format!("log:{}", &message[..end])
            }
        }
    }

    /// Longest the browser may spend on this step, if the step bounds it
    pub fn timeout_ms(&self) -> Option<u64> {
        match self {
            Step::Click { timeout_ms, .. } => *timeout_ms,
            Step::Wait { timeout_ms, .. } => Some(*timeout_ms),
            _ => None,
        }
    }

    /// Substitute `{{key}}` references in every string field
    pub fn render(&self, ctx: &TemplateContext) -> DriverResult<Step> {
        let r = |s: &str| ctx.render(s);
        Ok(match self {
            Step::Navigate {
                url,
                wait_for_selector,
            } => Step::Navigate {
                url: r(url)?,
                wait_for_selector: wait_for_selector.as_deref().map(r).transpose()?,
            },
            Step::Click {
                selector,
                timeout_ms,
                optional,
            } => Step::Click {
                selector: r(selector)?,
                timeout_ms: *timeout_ms,
                optional: *optional,
            },
            Step::Fill { selector, value } => Step::Fill {
                selector: r(selector)?,
                value: r(value)?,
            },
            Step::Upload { selector, path } => Step::Upload {
                selector: r(selector)?,
                path: r(path)?,
            },
            Step::Wait {
                selector,
                timeout_ms,
                state,
            } => Step::Wait {
                selector: r(selector)?,
                timeout_ms: *timeout_ms,
                state: *state,
            },
            Step::Sleep { ms } => Step::Sleep { ms: *ms },
            Step::Screenshot { name } => Step::Screenshot { name: r(name)? },
            Step::Log { message } => Step::Log {
                message: r(message)?,
            },
        })
    }
}

impl WorkflowSpec {
    pub fn from_yaml(yaml: &str) -> DriverResult<Self> {
        let spec: Self =
            serde_yaml::from_str(yaml).map_err(|e| DriverError::SpecParse(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: &Path) -> DriverResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Phase names become case names, so they must be present and distinct
    pub fn validate(&self) -> DriverResult<()> {
        if self.phases.is_empty() {
            return Err(DriverError::InvalidSpec(format!(
                "workflow '{}' has no phases",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for phase in &self.phases {
            if phase.name.trim().is_empty() {
                return Err(DriverError::InvalidSpec("phase with empty name".to_string()));
            }
            if !seen.insert(phase.name.as_str()) {
                return Err(DriverError::InvalidSpec(format!(
                    "duplicate phase '{}'",
                    phase.name
                )));
            }
        }
        Ok(())
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }
}
