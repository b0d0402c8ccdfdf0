//! A bounded, in-memory log of recent route events, kept for dumps.

use std::collections::VecDeque;

use chrono::Local;

/// Default number of entries retained
pub const DEFAULT_CAPACITY: usize = 20;

/// Rolling log; once full, the oldest entry is dropped for each new one.
#[derive(Debug)]
pub struct LocalLog {
    capacity: usize,
    entries: VecDeque<String>,
}

impl LocalLog {
    /// Constructor. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    /// Append an entry, stamped with the local wall-clock time
    pub fn log(&mut self, event: impl AsRef<str>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let stamp = Local::now().format("%m-%d %H:%M:%S%.3f");
        self.entries.push_back(format!("{stamp} - {}", event.as_ref()));
    }

    /// All retained entries, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was logged yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LocalLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
