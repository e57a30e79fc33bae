use crate::traits::ProvenanceSink;
use crate::types::{Step, TraceEvent, TraceKind};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Append-only list shared between concurrently running tasks.
///
/// Clones share the same storage. Appends take one lock, so entries are
/// never interleaved; ordering across tasks is arrival order.
#[derive(Debug)]
pub struct AppendLog<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for AppendLog<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> AppendLog<T> {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry.
    pub fn push(&self, entry: T) {
        self.entries.lock().push(entry);
    }

    /// Append a batch under one lock.
    pub fn extend(&self, entries: impl IntoIterator<Item = T>) {
        self.entries.lock().extend(entries);
    }

    /// Copy of all entries in append order.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.lock().clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The run's trace events.
pub type TraceLog = AppendLog<TraceEvent>;

impl AppendLog<TraceEvent> {
    /// Record the start of `step`.
    pub fn start(&self, step: Step, task_id: Option<&str>) {
        self.push(TraceEvent::new(TraceKind::Start, step, task_id));
    }

    /// Record the end of `step`.
    pub fn end(&self, step: Step, task_id: Option<&str>) {
        self.push(TraceEvent::new(TraceKind::End, step, task_id));
    }

    /// Record one scored dispatch. `attempt` counts from 1.
    pub fn attempt(&self, step: Step, task_id: &str, attempt: u32, score: f64, will_retry: bool) {
        let mut event = TraceEvent::new(TraceKind::Attempt, step, Some(task_id));
        event.attempt = Some(attempt);
        event.score = Some(score);
        event.will_retry = Some(will_retry);
        self.push(event);
    }

    /// Events for one task, in recorded order.
    pub fn for_task(&self, task_id: &str) -> Vec<TraceEvent> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect()
    }
}

/// A shared JSON log can serve as a tool executor's provenance record.
impl ProvenanceSink for AppendLog<Value> {
    fn get_provenance(&self) -> Vec<Value> {
        self.snapshot()
    }
}
