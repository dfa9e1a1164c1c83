//! Per-task ring buffers of output lines.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::RwLock;

use crate::config::DEFAULT_OUTPUT_BUFFER_LINES;

/// Bounded output history keyed by task id.
///
/// Buffers outlive their tasks; [`cleanup_old_buffers`](Self::cleanup_old_buffers)
/// must be called with the ids still known to the registry.
pub struct OutputBuffer {
    max_lines: usize,
    buffers: RwLock<HashMap<String, VecDeque<String>>>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_BUFFER_LINES)
    }
}

impl OutputBuffer {
    /// Buffer keeping at most `max_lines` lines per task (minimum 1).
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            buffers: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_lines
    }

    /// Append a line, evicting the oldest once the buffer is full.
    pub fn append(&self, task_id: &str, line: impl Into<String>) {
        let mut buffers = self.buffers.write();
        let buffer = buffers
            .entry(task_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.max_lines.min(64)));
        if buffer.len() == self.max_lines {
            buffer.pop_front();
        }
        buffer.push_back(line.into());
    }

    pub fn get_all(&self, task_id: &str) -> Vec<String> {
        self.buffers
            .read()
            .get(task_id)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The last `n` lines in original order.
    pub fn get_recent(&self, task_id: &str, n: usize) -> Vec<String> {
        let buffers = self.buffers.read();
        let Some(buffer) = buffers.get(task_id) else {
            return Vec::new();
        };
        let skip = buffer.len().saturating_sub(n);
        buffer.iter().skip(skip).cloned().collect()
    }

    pub fn line_count(&self, task_id: &str) -> usize {
        self.buffers.read().get(task_id).map_or(0, |b| b.len())
    }

    /// Empty a task's buffer but keep its entry.
    pub fn clear(&self, task_id: &str) {
        if let Some(buffer) = self.buffers.write().get_mut(task_id) {
            buffer.clear();
        }
    }

    pub fn remove(&self, task_id: &str) -> bool {
        self.buffers.write().remove(task_id).is_some()
    }

    /// Drop buffers whose task id is not in `valid_ids`.
    pub fn cleanup_old_buffers(&self, valid_ids: &HashSet<String>) -> usize {
        let mut buffers = self.buffers.write();
        let before = buffers.len();
        buffers.retain(|id, _| valid_ids.contains(id));
        before - buffers.len()
    }

    pub fn task_count(&self) -> usize {
        self.buffers.read().len()
    }
}
