//! Captured screenshots and their run-level store

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// A captured screenshot. Immutable once created.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub filename: String,
    pub payload: Bytes,
    pub captured_at: DateTime<Utc>,
    /// Hex SHA-256 of the payload
    pub sha256: String,
}

impl Artifact {
    pub fn new(filename: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::captured_at(filename, payload, Utc::now())
    }

    pub fn captured_at(
        filename: impl Into<String>,
        payload: impl Into<Bytes>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let payload = payload.into();
        let sha256 = hex::encode(Sha256::digest(&payload));
        Self {
            filename: filename.into(),
            payload,
            captured_at,
            sha256,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// Ordered collection of artifacts, in capture order.
///
/// Entries are reference counted so a case can point at the same artifact
/// the run owns.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    items: Vec<Arc<Artifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, artifact: Arc<Artifact>) {
        self.items.push(artifact);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Artifact>> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.items.iter().any(|a| a.filename == filename)
    }

    pub fn filenames(&self) -> Vec<String> {
        self.items.iter().map(|a| a.filename.clone()).collect()
    }

    /// Owned copies of every artifact, for handing to a notifier
    pub fn to_vec(&self) -> Vec<Arc<Artifact>> {
        self.items.clone()
    }
}
