//! Local fallback storage for payloads of failed writes
//!
//! Directory layout:
//! ```text
//! {fallback_dir}/
//! ├── manifest.jsonl                                 # one FallbackRecord per line
//! ├── suppliers_123_20250101T120000123Z_000000.json  # exact payload bytes
//! └── ...
//! ```
//!
//! Payload files are written to a dot-prefixed `.tmp` file and renamed into
//! place, so a listed file is always complete.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use harvest_core::HarvestError;
use serde::{Deserialize, Serialize};

use crate::operation::{WriteKind, WriteOperation};

pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// Longest sanitized path prefix used in a file name
const MAX_STEM: usize = 120;

/// Metadata needed to replay one spilled payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRecord {
    /// File name inside the fallback directory
    pub file: String,
    /// Target document path
    pub path: String,
    pub kind: WriteKind,
    pub merge: bool,
    /// Failure that caused the spill
    pub error: String,
    pub spilled_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct FallbackStore {
    dir: PathBuf,
    seq: AtomicU64,
}

/// Replace everything but ASCII alphanumerics, `-` and `_` with `_`.
pub fn sanitize(path: &str) -> String {
    let mut out: String = path
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(MAX_STEM);
    if out.is_empty() {
        out.push('_');
    }
    out
}

fn io_err(action: &str, path: &Path, e: std::io::Error) -> HarvestError {
    HarvestError::Fallback(format!("failed to {action} {}: {e}", path.display()))
}

impl FallbackStore {
    /// Open (and create if needed) the fallback directory.
    pub fn new(dir: &Path) -> Result<Self, HarvestError> {
        fs::create_dir_all(dir).map_err(|e| io_err("create fallback dir", dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Persist the payload of `op` verbatim. Operations without a payload are
    /// skipped and yield `None`.
    pub fn spill(
        &self,
        op: &WriteOperation,
        error: &HarvestError,
    ) -> Result<Option<FallbackRecord>, HarvestError> {
        let Some(payload) = op.payload() else {
            return Ok(None);
        };
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| HarvestError::Fallback(format!("{}: {e}", op.path())))?;

        let now = Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let name = format!(
            "{}_{}_{seq:06}.json",
            sanitize(op.path().as_str()),
            now.format("%Y%m%dT%H%M%S%3fZ")
        );
        let final_path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!(".{name}.tmp"));

        fs::write(&tmp_path, &bytes).map_err(|e| io_err("write", &tmp_path, e))?;
        fs::rename(&tmp_path, &final_path).map_err(|e| io_err("rename", &final_path, e))?;

        let record = FallbackRecord {
            file: name,
            path: op.path().to_string(),
            kind: op.kind(),
            merge: op.merge(),
            error: error.to_string(),
            spilled_at: now,
        };
        self.append_manifest(&record)?;
        log::debug!("spilled {} → {}", record.path, final_path.display());
        Ok(Some(record))
    }

    fn append_manifest(&self, record: &FallbackRecord) -> Result<(), HarvestError> {
        let path = self.manifest_path();
        let mut line = serde_json::to_string(record)
            .map_err(|e| HarvestError::Fallback(format!("manifest record: {e}")))?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err("open", &path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| io_err("append to", &path, e))
    }

    /// Payload files currently present, sorted by name.
    pub fn files(&self) -> Result<Vec<PathBuf>, HarvestError> {
        let pattern = self.dir.join("*.json");
        let pattern_str = pattern.to_string_lossy();
        let mut files: Vec<PathBuf> = glob::glob(&pattern_str)
            .map_err(|e| HarvestError::Fallback(format!("invalid glob pattern: {e}")))?
            .filter_map(|e| e.ok())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Manifest records whose payload file still exists, in spill order.
    ///
    /// Unparseable manifest lines are logged and skipped.
    pub fn list(&self) -> Result<Vec<FallbackRecord>, HarvestError> {
        let path = self.manifest_path();
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err("read", &path, e)),
        };
        let mut records = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FallbackRecord>(line) {
                Ok(r) if self.dir.join(&r.file).is_file() => records.push(r),
                Ok(_) => {}
                Err(e) => log::warn!("{}:{}: skipping corrupt record: {e}", path.display(), n + 1),
            }
        }
        Ok(records)
    }

    /// Rebuild the write operation for a spilled payload, tagged with its file.
    pub fn load(&self, record: &FallbackRecord) -> Result<WriteOperation, HarvestError> {
        let file = self.dir.join(&record.file);
        let bytes = fs::read(&file).map_err(|e| io_err("read", &file, e))?;
        let payload = serde_json::from_slice(&bytes)
            .map_err(|e| HarvestError::Fallback(format!("{}: {e}", file.display())))?;
        let mut op = WriteOperation::from_parts(record.kind, &record.path, Some(payload), record.merge)?;
        op.origin = Some(file);
        Ok(op)
    }

    pub fn remove(&self, file: &Path) -> Result<(), HarvestError> {
        match fs::remove_file(file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("remove", file, e)),
        }
    }

    /// Drop manifest lines whose payload file is gone. Returns the records kept.
    pub fn compact_manifest(&self) -> Result<usize, HarvestError> {
        let records = self.list()?;
        let path = self.manifest_path();
        let tmp = self.dir.join(format!(".{MANIFEST_FILE}.tmp"));
        let mut out = String::new();
        for r in &records {
            let line = serde_json::to_string(r)
                .map_err(|e| HarvestError::Fallback(format!("manifest record: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        fs::write(&tmp, out).map_err(|e| io_err("write", &tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_err("rename", &path, e))?;
        Ok(records.len())
    }
}
