// SPDX-License-Identifier: MIT OR Apache-2.0
//! Batched delivery of path state edits to the engine.
//!
//! The UI thread (or any thread holding a [`PathUpdateHandle`]) pushes
//! `(connection, state)` entries without blocking. A periodic tick, polled
//! from the UI loop, drains everything queued so far:
//!
//! 1. entries for the same connection collapse to the last one pushed;
//! 2. entries whose connection is gone are dropped;
//! 3. the rest are written to the engine under a single hold of the engine
//!    lock;
//! 4. the writes are recorded as one undo group.
//!
//! The timer starts on the first push and stops on the first tick that
//! finds the queue empty.

use crate::connection::ConnectionId;
use crate::engine::Engine;
use crate::history::{History, PathEdit};
use crate::path::PathState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Undo label of a committed batch
pub const BATCH_DESCRIPTION: &str = "Edit connection path";

/// A queued path state write
#[derive(Debug, Clone, PartialEq)]
pub struct PathUpdate {
    /// Target connection
    pub connection: ConnectionId,
    /// State to store
    pub state: PathState,
}

#[derive(Debug, Default)]
struct UpdateTimer {
    next_due: Option<Instant>,
}

/// What a tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Entries drained from the queue
    pub drained: usize,
    /// Entries superseded by a later push for the same connection
    pub coalesced: usize,
    /// Entries for connections that no longer exist
    pub dropped: usize,
    /// States written to the engine
    pub applied: usize,
}

/// Cloneable producer side of the queue
#[derive(Debug, Clone)]
pub struct PathUpdateHandle {
    tx: Sender<PathUpdate>,
    timer: Arc<Mutex<UpdateTimer>>,
    interval: Duration,
}

impl PathUpdateHandle {
    /// Queue a state for `connection` and make sure the timer runs
    pub fn push_path_state(&self, connection: ConnectionId, state: PathState) {
        if self.tx.send(PathUpdate { connection, state }).is_err() {
            tracing::debug!("path update queue is closed");
            return;
        }
        let mut timer = self.timer.lock();
        if timer.next_due.is_none() {
            timer.next_due = Some(Instant::now() + self.interval);
        }
    }
}

/// Coalescing path update queue, owned by the canvas
#[derive(Debug)]
pub struct PathUpdater {
    handle: PathUpdateHandle,
    rx: Receiver<PathUpdate>,
}

impl PathUpdater {
    /// Create an idle queue ticking every `interval` once started
    pub fn new(interval: Duration) -> Self {
        let (tx, rx) = unbounded();
        Self {
            handle: PathUpdateHandle {
                tx,
                timer: Arc::default(),
                interval,
            },
            rx,
        }
    }

    /// Producer handle for other threads
    pub fn handle(&self) -> PathUpdateHandle {
        self.handle.clone()
    }

    /// Queue a state for `connection`
    pub fn push_path_state(&self, connection: ConnectionId, state: PathState) {
        self.handle.push_path_state(connection, state);
    }

    /// Batching window
    pub fn interval(&self) -> Duration {
        self.handle.interval
    }

    /// Whether the timer is running
    pub fn is_running(&self) -> bool {
        self.handle.timer.lock().next_due.is_some()
    }

    /// Whether a tick is due at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        self.handle
            .timer
            .lock()
            .next_due
            .is_some_and(|due| now >= due)
    }

    /// Entries waiting for the next tick
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Stop the timer and discard anything still queued
    pub fn stop(&self) {
        self.handle.timer.lock().next_due = None;
        let discarded = self.rx.try_iter().count();
        if discarded > 0 {
            tracing::debug!(discarded, "path updater stopped with pending entries");
        }
    }

    /// Run a tick if one is due at `now`, rescheduling the timer afterwards
    pub fn poll(
        &self,
        now: Instant,
        engine: &Engine,
        history: &mut History,
        is_alive: impl Fn(&ConnectionId) -> bool,
    ) -> Option<TickReport> {
        if !self.is_due(now) {
            return None;
        }
        let report = self.tick(engine, history, is_alive);
        let mut timer = self.handle.timer.lock();
        if timer.next_due.is_some() {
            timer.next_due = Some(now + self.handle.interval);
        }
        Some(report)
    }

    /// Stop the timer unless a producer queued an entry after the drain.
    /// Producers send before taking the timer lock, so checking the channel
    /// under the lock cannot miss one.
    fn stop_if_idle(&self) {
        let mut timer = self.handle.timer.lock();
        if self.rx.is_empty() {
            timer.next_due = None;
            tracing::trace!("path updater idle, timer stopped");
        }
    }

    /// Drain the queue and commit the batch
    pub fn tick(
        &self,
        engine: &Engine,
        history: &mut History,
        is_alive: impl Fn(&ConnectionId) -> bool,
    ) -> TickReport {
        let drained: Vec<PathUpdate> = self.rx.try_iter().collect();
        let mut report = TickReport {
            drained: drained.len(),
            ..TickReport::default()
        };

        if drained.is_empty() {
            self.stop_if_idle();
            return report;
        }

        let mut latest: IndexMap<ConnectionId, PathState> = IndexMap::with_capacity(drained.len());
        for update in drained {
            latest.insert(update.connection, update.state);
        }
        report.coalesced = report.drained - latest.len();

        latest.retain(|connection, _| {
            let alive = is_alive(connection);
            if !alive {
                tracing::debug!(%connection, "dropping path update for removed connection");
                report.dropped += 1;
            }
            alive
        });

        let mut changes = Vec::with_capacity(latest.len());
        {
            let mut storage = engine.lock();
            for (connection, state) in latest {
                match storage.set_path_state(&connection, state.clone()) {
                    Some(before) => {
                        report.applied += 1;
                        if before != state {
                            changes.push((connection, before, state));
                        }
                    }
                    None => {
                        tracing::debug!(%connection, "engine has no record for path update");
                        report.dropped += 1;
                    }
                }
            }
        }

        let mut batch = history.begin_batch(BATCH_DESCRIPTION);
        for (connection, before, after) in changes {
            match PathEdit::new(connection, &before, &after) {
                Ok(edit) => batch.push(edit),
                Err(err) => tracing::warn!("failed to record path change: {err}"),
            }
        }
        history.commit(batch);

        tracing::debug!(
            drained = report.drained,
            coalesced = report.coalesced,
            dropped = report.dropped,
            applied = report.applied,
            "committed path update batch"
        );
        report
    }
}

impl Drop for PathUpdater {
    fn drop(&mut self) {
        self.stop();
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

    fn setup(ids: &[ConnectionId]) -> (PathUpdater, Engine, History) {
        let engine = Engine::in_memory();
        for id in ids {
            engine.lock().connect(id);
        }
        (PathUpdater::new(Duration::from_millis(50)), engine, History::new())
    }

    #[test]
    fn test_last_write_wins() {
        let id = conn_id();
        let (updater, engine, mut history) = setup(std::slice::from_ref(&id));

        for i in 0..10 {
            updater.push_path_state(id.clone(), PathState::from(format!("0 0, 0 {i}")));
        }
        assert_eq!(updater.pending(), 10);
        assert!(updater.is_running());

        let report = updater.tick(&engine, &mut history, |_| true);
        assert_eq!(report.applied, 1);
        assert_eq!(report.coalesced, 9);
        assert_eq!(engine.path_state(&id), Some(PathState::from("0 0, 0 9")));

        // One undo group for the whole batch
        assert_eq!(history.stats().undo_count, 1);
        assert_eq!(history.undo().unwrap().len(), 1);
    }

    #[test]
    fn test_one_group_per_batch() {
        let a = conn_id();
        let b = conn_id();
        let (updater, engine, mut history) = setup(&[a.clone(), b.clone()]);

        updater.push_path_state(a, "0 0, 0 5".into());
        updater.push_path_state(b, "0 0, 5 0".into());
        let report = updater.tick(&engine, &mut history, |_| true);

        assert_eq!(report.applied, 2);
        assert_eq!(history.stats().undo_count, 1);
        assert_eq!(history.undo().unwrap().len(), 2);
    }

    #[test]
    fn test_destroyed_connection_dropped() {
        let id = conn_id();
        let (updater, engine, mut history) = setup(std::slice::from_ref(&id));

        updater.push_path_state(id.clone(), "0 0, 0 5".into());
        let report = updater.tick(&engine, &mut history, |_| false);

        assert_eq!(report.applied, 0);
        assert_eq!(report.dropped, 1);
        assert_eq!(engine.path_state(&id), Some(PathState::default()));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_missing_engine_record_dropped() {
        let (updater, engine, mut history) = setup(&[]);
        updater.push_path_state(conn_id(), "0 0, 0 5".into());
        let report = updater.tick(&engine, &mut history, |_| true);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.applied, 0);
    }

    #[test]
    fn test_timer_lifecycle() {
        let id = conn_id();
        let (updater, engine, mut history) = setup(std::slice::from_ref(&id));
        assert!(!updater.is_running());

        let start = Instant::now();
        updater.push_path_state(id, "0 0, 0 5".into());
        assert!(updater.is_running());
        assert!(updater.poll(start, &engine, &mut history, |_| true).is_none());

        let later = start + Duration::from_millis(60);
        let report = updater.poll(later, &engine, &mut history, |_| true).unwrap();
        assert_eq!(report.applied, 1);
        assert!(updater.is_running());

        // Next tick finds nothing and stops the timer
        let idle = updater
            .poll(later + Duration::from_millis(60), &engine, &mut history, |_| true)
            .unwrap();
        assert_eq!(idle, TickReport::default());
        assert!(!updater.is_running());
    }

    #[test]
    fn test_unchanged_state_not_recorded() {
        let id = conn_id();
        let (updater, engine, mut history) = setup(std::slice::from_ref(&id));
        updater.push_path_state(id, PathState::default());
        let report = updater.tick(&engine, &mut history, |_| true);
        assert_eq!(report.applied, 1);
        assert!(!history.can_undo());
    }

    #[test]
    fn test_cross_thread_producers() {
        let ids: Vec<ConnectionId> = (0..4).map(|_| conn_id()).collect();
        let (updater, engine, mut history) = setup(&ids);

        let threads: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let handle = updater.handle();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        handle.push_path_state(id.clone(), PathState::from(format!("0 0, {i} 0")));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let report = updater.tick(&engine, &mut history, |_| true);
        assert_eq!(report.drained, 100);
        assert_eq!(report.applied, 4);
        for id in &ids {
            assert_eq!(engine.path_state(id), Some(PathState::from("0 0, 24 0")));
        }
    }

    #[test]
    fn test_push_after_empty_drain_keeps_timer() {
        let id = conn_id();
        let (updater, engine, mut history) = setup(std::slice::from_ref(&id));
        updater.push_path_state(id.clone(), "0 0, 0 5".into());
        updater.tick(&engine, &mut history, |_| true);

        // A tick drained nothing, then another thread pushed before the
        // tick got around to stopping the timer.
        assert_eq!(updater.rx.try_iter().count(), 0);
        updater.handle().push_path_state(id.clone(), "0 0, 0 9".into());
        updater.stop_if_idle();
        assert!(updater.is_running());

        let report = updater.tick(&engine, &mut history, |_| true);
        assert_eq!(report.applied, 1);
        assert_eq!(engine.path_state(&id), Some(PathState::from("0 0, 0 9")));

        updater.stop_if_idle();
        assert!(!updater.is_running());
    }

    #[test]
    fn test_stop_discards_pending() {
        let id = conn_id();
        let (updater, engine, mut history) = setup(std::slice::from_ref(&id));
        updater.push_path_state(id.clone(), "0 0, 0 5".into());
        updater.stop();

        assert!(!updater.is_running());
        assert_eq!(updater.pending(), 0);
        assert_eq!(updater.tick(&engine, &mut history, |_| true).applied, 0);
        assert_eq!(engine.path_state(&id), Some(PathState::default()));
    }
}
