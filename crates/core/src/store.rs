//! Persisted run documents
//!
//! One pretty-printed JSON snapshot per run at `<root>/<run_id>.json`.
//! Writes go through a temporary file and a rename so readers never see a
//! partial document.

use chrono::{DateTime, Utc};
use flowcheck_common::{Error, Result, RunStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::run::RunSnapshot;

/// Listing entry for a persisted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub case_count: usize,
    pub failed_cases: Vec<String>,
}

impl From<&RunSnapshot> for RunSummary {
    fn from(snapshot: &RunSnapshot) -> Self {
        Self {
            run_id: snapshot.run_id.clone(),
            status: snapshot.status,
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            duration_seconds: snapshot.duration_seconds,
            case_count: snapshot.cases.len(),
            failed_cases: snapshot
                .cases
                .iter()
                .filter(|c| c.status == RunStatus::Failed)
                .map(|c| c.name.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        info!("Result store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids are generated by us, but requests can carry arbitrary strings
    fn document_path(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty()
            || !run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::run_not_found(run_id));
        }
        Ok(self.root.join(format!("{}.json", run_id)))
    }

    pub async fn save(&self, snapshot: &RunSnapshot) -> Result<PathBuf> {
        let path = self.document_path(&snapshot.run_id)?;
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(snapshot)?;

        fs::write(&tmp, &content).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Saved run {} to {:?}", snapshot.run_id, path);
        Ok(path)
    }

    pub async fn load(&self, run_id: &str) -> Result<RunSnapshot> {
        let path = self.document_path(run_id)?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::run_not_found(run_id))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    pub async fn exists(&self, run_id: &str) -> bool {
        match self.document_path(run_id) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Summaries of every readable document, newest first. Unreadable files
    /// are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<RunSummary>> {
        let mut summaries = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }

            let parsed = fs::read(path)
                .await
                .map_err(Error::from)
                .and_then(|content| {
                    serde_json::from_slice::<RunSnapshot>(&content).map_err(Error::from)
                });
            match parsed {
                Ok(snapshot) => summaries.push(RunSummary::from(&snapshot)),
                Err(e) => warn!("Skipping unreadable result {:?}: {}", path, e),
            }
        }

        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(summaries)
    }
}
