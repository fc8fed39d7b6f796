//! Session worker: drives one session through its state machine.
//!
//! ```text
//! Loading --open ok--> Ready --fw_bytes >= max_bytes || eof_cached--> Cached
//!         \--open fails--> Error
//! ```
//!
//! After Ready the worker only watches progress and waits for a stop request.
//! It never tears down the source it published: whoever stopped it (cancel,
//! claim, eviction, clear_all) owns what happens to the resources next.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use super::engine::MediaEngine;
use super::notifier::{EventSink, StatusEvent};
use super::session::{SessionCell, Snapshot, Status, fill_snapshot};

/// Everything a worker thread needs. Moved into the thread on spawn.
pub(crate) struct Worker<E: MediaEngine> {
    pub engine: Arc<E>,
    pub cell: Arc<SessionCell<E>>,
    pub events: EventSink,
    pub poll_interval: Duration,
}

impl<E: MediaEngine> Worker<E> {
    pub fn run(self) {
        let locator = Arc::clone(&self.cell.locator);
        debug!("preload worker {} started for {}", self.cell.id, locator);

        if self.open() {
            self.monitor();
        }

        debug!("preload worker {} stopped for {}", self.cell.id, locator);
    }

    /// Loading phase. Returns `true` once the source is published as Ready.
    fn open(&self) -> bool {
        let cell = &self.cell;

        let context = match self.engine.create_context(&cell.budget) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("preload {}: context creation failed: {}", cell.locator, e);
                self.fail();
                return false;
            }
        };

        let mut source = match self.engine.open(&cell.locator, &cell.token, &context) {
            Ok(source) => source,
            Err(e) => {
                drop(context);
                if cell.hard_cancelled() {
                    debug!("preload {}: open aborted by cancel", cell.locator);
                } else {
                    warn!("preload {}: open failed: {}", cell.locator, e);
                    self.fail();
                }
                return false;
            }
        };

        let mut selected = 0;
        for stream in self.engine.streams(&source) {
            if stream.is_av() {
                self.engine.select_stream(&mut source, stream.index, true);
                selected += 1;
            }
        }
        self.engine.start_readahead(&mut source);
        debug!(
            "preload {}: opened, {} stream(s) selected, read-ahead started",
            cell.locator, selected
        );

        let published = cell.with_state(|state| {
            // Resources go into the cell either way so the canceller releases them
            state.context = Some(context);
            state.source = Some(source);
            if cell.hard_cancelled() {
                return None;
            }
            advance(&mut state.status, Status::Ready);
            state.last_snapshot = fill_snapshot(self.engine.as_ref(), state);
            Some(state.last_snapshot)
        });
        let Some(snapshot) = published else {
            debug!("preload {}: cancelled before publishing", cell.locator);
            return false;
        };
        if cell.hard_cancelled() {
            return false;
        }
        self.notify(snapshot);
        true
    }

    /// Ready phase: edge-triggered Cached detection, then park until stopped.
    fn monitor(&self) {
        let cell = &self.cell;
        let max_bytes = cell.budget.max_bytes;
        let mut target_notified = false;

        while !cell.stop_requested() {
            if !target_notified {
                let reached = cell.with_state(|state| {
                    let source = state.source.as_ref()?;
                    let progress = self.engine.progress(source);
                    trace!(
                        "preload {}: fw={} total={} eof={}",
                        cell.locator, progress.fw_bytes, progress.total_bytes, progress.eof_cached
                    );
                    if progress.fw_bytes >= max_bytes || progress.eof_cached {
                        advance(&mut state.status, Status::Cached);
                        state.last_snapshot = fill_snapshot(self.engine.as_ref(), state);
                        Some(state.last_snapshot)
                    } else {
                        None
                    }
                });
                if let Some(snapshot) = reached {
                    target_notified = true;
                    debug!(
                        "preload {}: cached ({} bytes, eof={})",
                        cell.locator, snapshot.fw_bytes, snapshot.eof_cached
                    );
                    self.notify(snapshot);
                }
            }

            if cell.wait_for_stop(self.poll_interval) {
                break;
            }
        }
    }

    fn fail(&self) {
        let snapshot = self.cell.with_state(|state| {
            advance(&mut state.status, Status::Error);
            state.last_snapshot = fill_snapshot(self.engine.as_ref(), state);
            state.last_snapshot
        });
        self.notify(snapshot);
    }

    fn notify(&self, snapshot: Snapshot) {
        self.events.send(StatusEvent {
            session: self.cell.id,
            locator: Arc::clone(&self.cell.locator),
            snapshot,
        });
    }
}

fn advance(status: &mut Status, next: Status) {
    debug_assert!(
        status.can_advance_to(next),
        "illegal status transition {:?} -> {:?}",
        status,
        next
    );
    *status = next;
}
