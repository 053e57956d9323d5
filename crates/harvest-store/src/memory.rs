//! In-memory document store
//!
//! Applies commits atomically against a `BTreeMap` of documents. Latency and
//! failures can be injected, which makes it the store of choice in tests and
//! dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::HarvestError;
use serde_json::{Map, Value};

use crate::operation::{WriteKind, WriteOperation};
use crate::store::DocumentStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Value>>,
    latency: Mutex<Duration>,
    /// Number of upcoming commits to reject
    fail_next: AtomicUsize,
    fail_all: AtomicBool,
    commits: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Decrements the in-flight counter when a commit finishes or is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Reject the next `n` commits with a retryable store error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn fail_all(&self, on: bool) {
        self.fail_all.store(on, Ordering::SeqCst);
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        lock(&self.docs).get(path).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.docs).is_empty()
    }

    /// Successful commits so far
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Operation count of every commit attempt, in arrival order
    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.batch_sizes).clone()
    }

    /// Highest number of commits observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        self.fail_all.load(Ordering::SeqCst)
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }

    fn apply(docs: &mut BTreeMap<String, Value>, op: &WriteOperation) -> Result<(), HarvestError> {
        let key = op.path().as_str();
        match (op.kind(), op.payload()) {
            (WriteKind::Delete, _) => {
                docs.remove(key);
            }
            (WriteKind::Set, Some(payload)) if op.merge() => {
                let doc = docs
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                merge_fields(doc, payload);
            }
            (WriteKind::Set, Some(payload)) => {
                docs.insert(key.to_string(), payload.clone());
            }
            (WriteKind::Update, Some(payload)) => match docs.get_mut(key) {
                Some(doc) => merge_fields(doc, payload),
                None => {
                    return Err(HarvestError::Store {
                        message: format!("update of missing document {key}"),
                        timeout: false,
                    });
                }
            },
            (kind, None) => {
                return Err(HarvestError::validation(format!(
                    "{key}: {kind:?} without payload"
                )));
            }
        }
        Ok(())
    }
}

fn merge_fields(doc: &mut Value, payload: &Value) {
    match (doc.as_object_mut(), payload.as_object()) {
        (Some(target), Some(fields)) => {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }
        _ => *doc = payload.clone(),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn commit(&self, ops: &[WriteOperation]) -> Result<(), HarvestError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        lock(&self.batch_sizes).push(ops.len());

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.should_fail() {
            return Err(HarvestError::Store {
                message: "injected failure".to_string(),
                timeout: false,
            });
        }

        // Stage on a copy so a failing operation leaves nothing applied
        let mut docs = lock(&self.docs);
        let mut staged = docs.clone();
        let mut failed = 0;
        let mut first_error = None;
        for op in ops {
            if let Err(e) = Self::apply(&mut staged, op) {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(HarvestError::PartialBatchFailure {
                failed,
                total: ops.len(),
                message: e.to_string(),
            });
        }
        *docs = staged;
        drop(docs);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
