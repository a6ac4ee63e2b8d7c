use std::io::{self, Write};

use parking_lot::Mutex;

use crate::api::TraceEntry;

/// Receives admitted trace entries. Ownership moves into the store.
pub trait TraceStore: Send + Sync {
    fn store(&self, entry: TraceEntry);
}

#[derive(Default)]
pub struct MemoryTraceStore {
    entries: Mutex<Vec<TraceEntry>>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<TraceEntry> {
        self.entries.lock().clone()
    }

    /// Writes every buffered entry, one per line, and empties the buffer.
    /// On a write error the buffer is left intact.
    pub fn write_api_trace<W: Write>(&self, out: &mut W) -> io::Result<usize> {
        let mut entries = self.entries.lock();
        for entry in entries.iter() {
            writeln!(
                out,
                "{} {} {} {}",
                entry.api, entry.start, entry.end, entry.payload
            )?;
        }

        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

impl TraceStore for MemoryTraceStore {
    fn store(&self, entry: TraceEntry) {
        self.entries.lock().push(entry);
    }
}
