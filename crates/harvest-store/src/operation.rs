//! Document paths and queued write operations

use std::path::PathBuf;

use harvest_core::HarvestError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path of alternating collection/document segments, e.g. `suppliers/123`.
///
/// Always an even, non-zero number of non-empty segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn parse(raw: &str) -> Result<Self, HarvestError> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(HarvestError::validation("empty document path"));
        }
        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(HarvestError::validation(format!(
                "empty segment in document path {raw:?}"
            )));
        }
        if segments.len() % 2 != 0 {
            return Err(HarvestError::validation(format!(
                "document path {raw:?} has {} segments; expected collection/document pairs",
                segments.len()
            )));
        }
        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collection path (everything but the last segment)
    pub fn collection(&self) -> &str {
        self.0.rsplit_once('/').map_or("", |(c, _)| c)
    }

    pub fn document_id(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, id)| id)
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Set,
    Update,
    Delete,
}

/// A queued write. Consumed exactly once by a commit cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOperation {
    kind: WriteKind,
    path: DocPath,
    payload: Option<Value>,
    merge: bool,
    /// Serialized payload size in bytes
    encoded_len: usize,
    /// Fallback file this operation was replayed from
    pub(crate) origin: Option<PathBuf>,
}

fn encoded_len(payload: &Value) -> usize {
    serde_json::to_vec(payload).map_or(0, |b| b.len())
}

impl WriteOperation {
    fn with_payload(
        kind: WriteKind,
        path: &str,
        payload: Value,
        merge: bool,
    ) -> Result<Self, HarvestError> {
        if !payload.is_object() {
            return Err(HarvestError::validation(format!(
                "{path}: payload must be a JSON object"
            )));
        }
        Ok(Self {
            kind,
            path: DocPath::parse(path)?,
            encoded_len: encoded_len(&payload),
            payload: Some(payload),
            merge,
            origin: None,
        })
    }

    /// Overwrite the document
    pub fn set(path: &str, payload: Value) -> Result<Self, HarvestError> {
        Self::with_payload(WriteKind::Set, path, payload, false)
    }

    /// Create or merge top-level fields into the document
    pub fn set_merge(path: &str, payload: Value) -> Result<Self, HarvestError> {
        Self::with_payload(WriteKind::Set, path, payload, true)
    }

    /// Update fields of an existing document
    pub fn update(path: &str, payload: Value) -> Result<Self, HarvestError> {
        Self::with_payload(WriteKind::Update, path, payload, false)
    }

    pub fn delete(path: &str) -> Result<Self, HarvestError> {
        Ok(Self {
            kind: WriteKind::Delete,
            path: DocPath::parse(path)?,
            payload: None,
            merge: false,
            encoded_len: 0,
            origin: None,
        })
    }

    /// Rebuild an operation from its parts (used by fallback replay).
    pub fn from_parts(
        kind: WriteKind,
        path: &str,
        payload: Option<Value>,
        merge: bool,
    ) -> Result<Self, HarvestError> {
        match (kind, payload) {
            (WriteKind::Delete, _) => Self::delete(path),
            (kind, Some(payload)) => Self::with_payload(kind, path, payload, merge),
            (kind, None) => Err(HarvestError::validation(format!(
                "{path}: {kind:?} requires a payload"
            ))),
        }
    }

    pub fn kind(&self) -> WriteKind {
        self.kind
    }

    pub fn path(&self) -> &DocPath {
        &self.path
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn merge(&self) -> bool {
        self.merge
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }

    /// Reject payloads over the per-document ceiling before anything is sent.
    pub fn validate(&self, max_document_bytes: usize) -> Result<(), HarvestError> {
        if self.encoded_len > max_document_bytes {
            return Err(HarvestError::validation(format!(
                "{}: payload is {} bytes, limit is {max_document_bytes}",
                self.path, self.encoded_len
            )));
        }
        Ok(())
    }
}
