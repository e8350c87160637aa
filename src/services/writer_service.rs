use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, error, warn};

use crate::data::{self, repository};
use crate::error::IndexError;
use crate::models::event::IndexEvent;
use crate::services::metadata_service;

/// Commit at least every this many applied events to bound transaction
/// size without giving up batching throughput.
pub const COMMIT_EVERY: usize = 50;

/// Queue pop timeout; the upper bound on how long a stop signal can go
/// unobserved while the queue is idle.
pub const POP_TIMEOUT: Duration = Duration::from_millis(250);

/// Monotonic marker counter. The writer bumps it after committing past a
/// `Marker` event; rebuild/resync block on it as their drain point.
pub struct DrainBarrier {
    seq: Mutex<u64>,
    cond: Condvar,
}

impl DrainBarrier {
    pub fn new() -> Self {
        Self {
            seq: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Snapshot to pass to `wait_past` before enqueuing a marker.
    pub fn generation(&self) -> u64 {
        *self.seq.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn signal(&self) {
        let mut seq = self.seq.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *seq += 1;
        self.cond.notify_all();
    }

    /// Block until the writer has processed a marker enqueued after the
    /// `gen` snapshot was taken.
    pub fn wait_past(&self, gen: u64) {
        let mut seq = self.seq.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while *seq <= gen {
            seq = self
                .cond
                .wait(seq)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl Default for DrainBarrier {
    fn default() -> Self {
        Self::new()
    }
}

fn commit_and_reopen(conn: &Connection, write_gen: &AtomicU64) {
    if let Err(e) = conn.execute_batch("COMMIT") {
        error!("commit failed: {e}");
    }
    if let Err(e) = conn.execute_batch("BEGIN") {
        error!("failed to reopen write transaction: {e}");
    }
    write_gen.fetch_add(1, Ordering::Release);
}

fn apply_index(conn: &Connection, music_root: &Path, rel: &Path) -> Result<(), IndexError> {
    let rel_str = rel.to_string_lossy();
    let track = metadata_service::read_track(&music_root.join(rel), &rel_str)?;
    repository::upsert_track(conn, &track)
}

fn apply_delete(conn: &Connection, rel: &Path) -> Result<(), IndexError> {
    repository::delete_by_path(conn, &rel.to_string_lossy())?;
    Ok(())
}

/// The sole consumer of the event queue and the only holder of a write
/// handle. Applies events in strict FIFO order; for any one path the last
/// event's effect wins. A failing event is logged and skipped, never fatal.
pub fn run_writer(
    db_path: PathBuf,
    music_root: PathBuf,
    queue: Receiver<IndexEvent>,
    stop: Arc<AtomicBool>,
    barrier: Arc<DrainBarrier>,
    write_gen: Arc<AtomicU64>,
) {
    // The store was bootstrapped before this thread was spawned; failing to
    // reopen it here means the data directory vanished underneath us.
    let conn = match data::open_writable(&db_path) {
        Ok(conn) => conn,
        Err(e) => {
            error!(path = %db_path.display(), "writer could not open store: {e}");
            return;
        }
    };
    if let Err(e) = conn.execute_batch("BEGIN") {
        error!("writer could not open a transaction: {e}");
        return;
    }

    let mut pending = 0usize;
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match queue.recv_timeout(POP_TIMEOUT) {
            Ok(IndexEvent::Index(rel)) => {
                if let Err(e) = apply_index(&conn, &music_root, &rel) {
                    warn!(path = %rel.display(), "skipping index event: {e}");
                } else {
                    pending += 1;
                }
            }
            Ok(IndexEvent::Delete(rel)) => {
                if let Err(e) = apply_delete(&conn, &rel) {
                    warn!(path = %rel.display(), "skipping delete event: {e}");
                } else {
                    pending += 1;
                }
            }
            Ok(IndexEvent::ClearAll) => {
                match repository::clear_all(&conn) {
                    Ok(removed) => debug!(removed, "canonical table cleared"),
                    Err(e) => warn!("clear-all failed: {e}"),
                }
                pending += 1;
            }
            Ok(IndexEvent::Marker(kind)) => {
                commit_and_reopen(&conn, &write_gen);
                pending = 0;
                barrier.signal();
                debug!(?kind, "completion marker committed");
            }
            Err(RecvTimeoutError::Timeout) => {
                // Queue went idle; don't leave watcher-driven changes
                // sitting in an open transaction where readers can't see
                // them.
                if pending > 0 {
                    commit_and_reopen(&conn, &write_gen);
                    pending = 0;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if pending >= COMMIT_EVERY {
            commit_and_reopen(&conn, &write_gen);
            pending = 0;
        }
    }

    // Shutdown: whatever was applied gets committed before the handle goes
    // away; the queue itself may still hold unprocessed events.
    if let Err(e) = conn.execute_batch("COMMIT") {
        error!("final commit failed: {e}");
    }
    write_gen.fetch_add(1, Ordering::Release);
    debug!("writer stopped");
}
