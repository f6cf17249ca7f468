//! Bounded history of device filesystem operations.
//!
//! The log exists for UI display (a "recent activity" panel). Errors are
//! recorded here and still propagate to the caller; the log never
//! swallows anything.

use std::collections::VecDeque;

/// What a filesystem operation was doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Reading a file from the device.
    Read,
    /// Writing a file to the device.
    Write,
    /// Deleting a file or directory.
    Delete,
    /// Creating directories.
    Mkdir,
    /// Querying filesystem or device metadata.
    Stat,
    /// Listing the filesystem tree.
    List,
}

/// Where an operation is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpStatus {
    /// Recorded but not started.
    Queued,
    /// Currently running.
    InProgress,
    /// Finished successfully.
    Success,
    /// Failed; the message mirrors the error the caller received.
    Error(String),
}

/// One recorded operation.
#[derive(Debug, Clone)]
pub struct OpRecord {
    /// Operation kind.
    pub kind: OpKind,
    /// Device-side path the operation targeted.
    pub path: String,
    /// Current status.
    pub status: OpStatus,
    /// Bytes transferred so far (reads and writes).
    pub bytes_done: usize,
    /// Total bytes when known up front.
    pub bytes_total: usize,
}

/// Bounded operation history.
///
/// Entries are addressed by monotonic ids, not buffer positions, so an
/// id held across eviction of older entries can never resolve to the
/// wrong record; it simply stops resolving.
#[derive(Debug, Default)]
pub struct OpLog {
    records: VecDeque<OpRecord>,
    /// Id of the oldest record still held.
    first_id: usize,
}

/// Oldest entries fall off once the log is full.
const MAX_RECORDS: usize = 64;

impl OpLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation as queued, returning its id.
    pub fn start(&mut self, kind: OpKind, path: &str, bytes_total: usize) -> usize {
        if self.records.len() == MAX_RECORDS {
            self.records.pop_front();
            self.first_id += 1;
        }
        self.records.push_back(OpRecord {
            kind,
            path: path.to_string(),
            status: OpStatus::Queued,
            bytes_done: 0,
            bytes_total,
        });
        self.first_id + self.records.len() - 1
    }

    /// Mark a queued operation as running.
    pub fn begin(&mut self, id: usize) {
        if let Some(record) = self.record_mut(id) {
            record.status = OpStatus::InProgress;
        }
    }

    /// Update the byte counter of a running operation.
    pub fn progress(&mut self, id: usize, bytes_done: usize) {
        if let Some(record) = self.record_mut(id) {
            record.bytes_done = bytes_done;
        }
    }

    /// Mark an operation finished.
    pub fn finish(&mut self, id: usize, result: Result<(), &str>) {
        if let Some(record) = self.record_mut(id) {
            record.status = match result {
                Ok(()) => OpStatus::Success,
                Err(msg) => OpStatus::Error(msg.to_string()),
            };
        }
    }

    fn record_mut(&mut self, id: usize) -> Option<&mut OpRecord> {
        let index = id.checked_sub(self.first_id)?;
        self.records.get_mut(index)
    }

    /// All records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &OpRecord> {
        self.records.iter()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
