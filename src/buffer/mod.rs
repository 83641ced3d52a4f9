//! Per-signature payload accumulator.

use std::time::{Duration, Instant};

/// Accumulated, not-yet-flushed row payload for one insert signature.
///
/// Fragments are kept in arrival order and only joined when the buffer is
/// claimed for flushing.
#[derive(Debug)]
pub struct TableBuffer {
    fragments: Vec<String>,
    rows: usize,
    bytes: usize,
    first_write: Instant,
}

impl TableBuffer {
    pub fn new() -> Self {
        Self {
            fragments: Vec::new(),
            rows: 0,
            bytes: 0,
            first_write: Instant::now(),
        }
    }

    /// Append one pushed payload fragment.
    pub fn append(&mut self, rows: String, row_count: usize) {
        self.bytes += rows.len();
        self.rows += row_count;
        self.fragments.push(rows);
    }

    /// Accumulated row count across all fragments.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Accumulated payload size in bytes (separators not included).
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Age of the oldest unflushed fragment.
    pub fn age(&self) -> Duration {
        self.first_write.elapsed()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Join all fragments in arrival order, consuming the buffer.
    pub fn merge(self, separator: &str) -> String {
        self.fragments.join(separator)
    }
}

impl Default for TableBuffer {
    fn default() -> Self {
        Self::new()
    }
}
