// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undo/redo history of committed path edits.
//!
//! Each committed batch of the path update queue becomes one [`Batch`];
//! every connection written in the batch contributes one [`PathEdit`] with
//! bincode snapshots of its path state before and after the write.

use crate::connection::ConnectionId;
use crate::path::PathState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Batches kept on the undo stack
const DEFAULT_DEPTH: usize = 100;

/// History errors
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Nothing to undo
    #[error("Nothing to undo")]
    NothingToUndo,

    /// Nothing to redo
    #[error("Nothing to redo")]
    NothingToRedo,

    /// Snapshot encoding or decoding failed
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),
}

/// Result type for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Which side of an edit to restore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Restore the state before the edit
    Undo,
    /// Restore the state after the edit
    Redo,
}

/// Identifies a committed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(u64);

impl BatchId {
    /// Raw sequence number
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Encoded path state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Snapshot(Vec<u8>);

impl Snapshot {
    fn encode(state: &PathState) -> Result<Self> {
        Ok(Self(bincode::serialize(state)?))
    }

    fn decode(&self) -> Result<PathState> {
        Ok(bincode::deserialize(&self.0)?)
    }
}

/// Path state change of one connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathEdit {
    /// Connection that was written
    pub connection: ConnectionId,
    before: Snapshot,
    after: Snapshot,
}

impl PathEdit {
    /// Record a path state change
    pub fn new(connection: ConnectionId, before: &PathState, after: &PathState) -> Result<Self> {
        Ok(Self {
            connection,
            before: Snapshot::encode(before)?,
            after: Snapshot::encode(after)?,
        })
    }

    /// State to write back when replaying in `direction`
    pub fn state(&self, direction: Replay) -> Result<PathState> {
        match direction {
            Replay::Undo => self.before.decode(),
            Replay::Redo => self.after.decode(),
        }
    }

    /// Bytes held by both snapshots
    pub fn bytes(&self) -> usize {
        self.before.0.len() + self.after.0.len()
    }
}

/// Edits undone and redone as one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Sequence number
    pub id: BatchId,
    /// Undo menu label
    pub label: String,
    /// One edit per connection written
    pub edits: Vec<PathEdit>,
    /// Seconds since the Unix epoch
    pub recorded_at: u64,
}

impl Batch {
    /// Append an edit
    pub fn push(&mut self, edit: PathEdit) {
        self.edits.push(edit);
    }

    /// Number of edits
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Whether the batch holds no edits
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Bytes held by the batch's snapshots
    pub fn bytes(&self) -> usize {
        self.edits.iter().map(PathEdit::bytes).sum()
    }
}

/// History statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Batches that can be undone
    pub undo_count: usize,
    /// Batches that can be redone
    pub redo_count: usize,
    /// Snapshot bytes on the undo stack
    pub bytes: usize,
    /// Maximum undo depth
    pub max_depth: usize,
}

/// Undo and redo stacks of path edit batches
#[derive(Debug)]
pub struct History {
    done: VecDeque<Batch>,
    undone: Vec<Batch>,
    next_id: u64,
    max_depth: usize,
    bytes: usize,
}

impl History {
    /// Create a history keeping the default number of batches
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_DEPTH)
    }

    /// Create a history keeping at most `max_depth` batches
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            done: VecDeque::new(),
            undone: Vec::new(),
            next_id: 1,
            max_depth,
            bytes: 0,
        }
    }

    /// Start a batch to fill before [`Self::commit`]
    pub fn begin_batch(&mut self, label: &str) -> Batch {
        let id = BatchId(self.next_id);
        self.next_id += 1;
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Batch {
            id,
            label: label.to_string(),
            edits: Vec::new(),
            recorded_at,
        }
    }

    /// Push a batch onto the undo stack and forget anything undone.
    /// Empty batches are dropped.
    pub fn commit(&mut self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        self.undone.clear();
        self.bytes += batch.bytes();
        self.done.push_back(batch);

        while self.done.len() > self.max_depth {
            if let Some(oldest) = self.done.pop_front() {
                self.bytes = self.bytes.saturating_sub(oldest.bytes());
            }
        }
    }

    /// Take the latest batch for undoing
    pub fn undo(&mut self) -> Result<Batch> {
        let batch = self.done.pop_back().ok_or(HistoryError::NothingToUndo)?;
        self.bytes = self.bytes.saturating_sub(batch.bytes());
        self.undone.push(batch.clone());
        Ok(batch)
    }

    /// Take the latest undone batch for redoing
    pub fn redo(&mut self) -> Result<Batch> {
        let batch = self.undone.pop().ok_or(HistoryError::NothingToRedo)?;
        self.bytes += batch.bytes();
        self.done.push_back(batch.clone());
        Ok(batch)
    }

    /// Whether undo is available
    pub fn can_undo(&self) -> bool {
        !self.done.is_empty()
    }

    /// Whether redo is available
    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.done.clear();
        self.undone.clear();
        self.bytes = 0;
    }

    /// Stack sizes and memory use
    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            undo_count: self.done.len(),
            redo_count: self.undone.len(),
            bytes: self.bytes,
            max_depth: self.max_depth,
        }
    }

    /// Label of the batch [`Self::undo`] would return
    pub fn undo_label(&self) -> Option<&str> {
        self.done.back().map(|b| b.label.as_str())
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iolet::IoletRef;
    use crate::object::ObjectId;

    fn conn_id() -> ConnectionId {
        ConnectionId::new(
            &IoletRef::outlet(ObjectId::new(), 0),
            &IoletRef::inlet(ObjectId::new(), 0),
        )
    }

    fn batch_of(history: &mut History, n: usize) -> Batch {
        let mut batch = history.begin_batch("Edit path");
        for _ in 0..n {
            let edit = PathEdit::new(conn_id(), &PathState::default(), &"0 0, 0 10".into());
            batch.push(edit.unwrap());
        }
        batch
    }

    #[test]
    fn test_edit_replays_both_sides() {
        let edit = PathEdit::new(conn_id(), &"1 2, 3 4".into(), &PathState::default()).unwrap();
        assert_eq!(edit.state(Replay::Undo).unwrap(), PathState::from("1 2, 3 4"));
        assert!(edit.state(Replay::Redo).unwrap().is_empty());
        assert!(edit.bytes() > 0);
    }

    #[test]
    fn test_undo_redo() {
        let mut history = History::new();
        let batch = batch_of(&mut history, 2);
        history.commit(batch);

        assert!(history.can_undo());
        assert_eq!(history.undo_label(), Some("Edit path"));

        let undone = history.undo().unwrap();
        assert_eq!(undone.len(), 2);
        assert!(!history.can_undo());
        assert_eq!(history.undo_label(), None);

        let redone = history.redo().unwrap();
        assert_eq!(redone.id, undone.id);
        assert!(matches!(history.redo(), Err(HistoryError::NothingToRedo)));
    }

    #[test]
    fn test_empty_batch_dropped() {
        let mut history = History::new();
        let batch = batch_of(&mut history, 0);
        history.commit(batch);
        assert!(!history.can_undo());
        assert!(matches!(history.undo(), Err(HistoryError::NothingToUndo)));
    }

    #[test]
    fn test_depth_limit() {
        let mut history = History::with_max_depth(3);
        let mut one_batch = 0;
        for _ in 0..5 {
            let batch = batch_of(&mut history, 1);
            one_batch = batch.bytes();
            history.commit(batch);
        }
        let stats = history.stats();
        assert_eq!(stats.undo_count, 3);
        assert_eq!(stats.bytes, one_batch * 3);
    }

    #[test]
    fn test_commit_clears_redo() {
        let mut history = History::new();
        let batch = batch_of(&mut history, 1);
        history.commit(batch);
        history.undo().unwrap();
        assert_eq!(history.stats().bytes, 0);

        let batch = batch_of(&mut history, 1);
        history.commit(batch);
        assert!(!history.can_redo());
    }
}
