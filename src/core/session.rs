//! Session data model: status, snapshots, options and the per-session cell
//! shared between the registry and the session's worker thread.
//!
//! Ownership split:
//! - the worker is the only writer of `status`, `source` and `context`
//!   while it runs;
//! - the registry only flips the stop flags (soft/hard) and, once the worker
//!   is joined, moves `source`/`context` out of the cell.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::trace;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cancel::CancelToken;
use super::engine::{Budget, MediaEngine};

/// Default read-ahead byte target (10 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Default read-ahead duration target in seconds.
pub const DEFAULT_READAHEAD_SECS: f64 = 10.0;

/// Session status. Numeric codes are stable and used by the REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No session for this locator.
    #[default]
    None,
    /// Worker is opening the source.
    Loading,
    /// Source opened, read-ahead running. Claimable.
    Ready,
    /// Open failed. Terminal.
    Error,
    /// Byte budget reached or whole source cached. Claimable.
    Cached,
}

impl Status {
    pub fn code(self) -> i64 {
        match self {
            Status::None => 0,
            Status::Loading => 1,
            Status::Ready => 2,
            Status::Error => 3,
            Status::Cached => 4,
        }
    }

    /// Allowed forward transitions: None→Loading→{Ready→Cached | Error}.
    pub fn can_advance_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::None, Status::Loading)
                | (Status::Loading, Status::Ready)
                | (Status::Loading, Status::Error)
                | (Status::Ready, Status::Cached)
        )
    }

    /// Worker has nothing left to do but wait for a stop request.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Error | Status::Cached)
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: Status,
    /// Bytes cached ahead of the read position.
    pub fw_bytes: u64,
    /// Bytes held in the engine buffer.
    pub total_bytes: u64,
    /// Size of the source, `-1` if unknown.
    pub file_size: i64,
    /// Buffered duration in seconds.
    pub buffered_secs: f64,
    /// Whole source cached.
    pub eof_cached: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            status: Status::None,
            fw_bytes: 0,
            total_bytes: 0,
            file_size: -1,
            buffered_secs: 0.0,
            eof_cached: false,
        }
    }
}

/// Caller-supplied budget. Zero or negative values mean "use the default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PreloadOptions {
    #[serde(default)]
    pub max_bytes: u64,
    #[serde(default)]
    pub readahead_secs: f64,
}

impl PreloadOptions {
    pub fn new(max_bytes: u64, readahead_secs: f64) -> Self {
        Self { max_bytes, readahead_secs }
    }

    /// Fill unset fields from `defaults`.
    pub fn resolve(&self, defaults: &Budget) -> Budget {
        Budget {
            max_bytes: if self.max_bytes > 0 { self.max_bytes } else { defaults.max_bytes },
            readahead_secs: if self.readahead_secs > 0.0 {
                self.readahead_secs
            } else {
                defaults.readahead_secs
            },
        }
    }
}

/// Fields mutated by the worker.
pub(crate) struct SessionState<E: MediaEngine> {
    pub status: Status,
    pub context: Option<E::Context>,
    pub source: Option<E::Source>,
    /// Last snapshot handed to the notifier.
    pub last_snapshot: Snapshot,
}

#[derive(Debug, Default)]
struct StopFlags {
    soft: bool,
    hard: bool,
}

/// State shared by the registry entry and its worker thread.
pub(crate) struct SessionCell<E: MediaEngine> {
    pub id: Uuid,
    pub locator: Arc<str>,
    pub budget: Budget,
    pub token: CancelToken,
    state: Mutex<SessionState<E>>,
    stop: Mutex<StopFlags>,
    wake: Condvar,
}

impl<E: MediaEngine> SessionCell<E> {
    pub fn new(locator: &str, budget: Budget) -> Self {
        Self {
            id: Uuid::new_v4(),
            locator: Arc::from(locator),
            budget,
            token: CancelToken::new(),
            state: Mutex::new(SessionState {
                status: Status::Loading,
                context: None,
                source: None,
                last_snapshot: Snapshot::default(),
            }),
            stop: Mutex::new(StopFlags::default()),
            wake: Condvar::new(),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut SessionState<E>) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn status(&self) -> Status {
        self.with_state(|s| s.status)
    }

    /// Source handle present (opened and not yet handed off).
    pub fn has_source(&self) -> bool {
        self.with_state(|s| s.source.is_some())
    }

    pub fn snapshot(&self, engine: &E) -> Snapshot {
        self.with_state(|s| fill_snapshot(engine, s))
    }

    /// Move the owned resources out. Only valid once the worker is joined.
    pub fn take_resources(&self) -> (Option<E::Source>, Option<E::Context>) {
        self.with_state(|s| (s.source.take(), s.context.take()))
    }

    /// Ask the worker to park without touching the token.
    pub fn request_soft_stop(&self) {
        let mut stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
        stop.soft = true;
        self.wake.notify_all();
        trace!("session {} soft stop requested", self.id);
    }

    /// Ask the worker to abort, propagating into the engine via the token.
    pub fn request_hard_cancel(&self) {
        {
            let mut stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
            stop.hard = true;
            self.wake.notify_all();
        }
        self.token.cancel();
        trace!("session {} hard cancel requested", self.id);
    }

    pub fn hard_cancelled(&self) -> bool {
        self.stop.lock().unwrap_or_else(|e| e.into_inner()).hard || self.token.is_cancelled()
    }

    pub fn stop_requested(&self) -> bool {
        let stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
        stop.soft || stop.hard || self.token.is_cancelled()
    }

    /// Sleep up to `timeout`, waking early on any stop request.
    ///
    /// Returns `true` if a stop was requested.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
        let (stop, _) = self
            .wake
            .wait_timeout_while(stop, timeout, |s| !s.soft && !s.hard)
            .unwrap_or_else(|e| e.into_inner());
        stop.soft || stop.hard || self.token.is_cancelled()
    }
}

/// Build a snapshot from the worker-owned state plus a live engine query.
pub(crate) fn fill_snapshot<E: MediaEngine>(engine: &E, state: &SessionState<E>) -> Snapshot {
    let mut snap = Snapshot {
        status: state.status,
        ..Snapshot::default()
    };
    if let Some(source) = state.source.as_ref() {
        let progress = engine.progress(source);
        snap.fw_bytes = progress.fw_bytes;
        snap.total_bytes = progress.total_bytes;
        snap.eof_cached = progress.eof_cached;
        if progress.duration >= 0.0 {
            snap.buffered_secs = progress.duration;
        }
        snap.file_size = engine.stream_size(source);
    }
    snap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(Status::None.can_advance_to(Status::Loading));
        assert!(Status::Loading.can_advance_to(Status::Ready));
        assert!(Status::Loading.can_advance_to(Status::Error));
        assert!(Status::Ready.can_advance_to(Status::Cached));

        assert!(!Status::Ready.can_advance_to(Status::Loading));
        assert!(!Status::Cached.can_advance_to(Status::Ready));
        assert!(!Status::Error.can_advance_to(Status::Ready));
        assert!(!Status::Loading.can_advance_to(Status::Cached));
    }

    #[test]
    fn test_status_codes() {
        let codes: Vec<i64> = [
            Status::None,
            Status::Loading,
            Status::Ready,
            Status::Error,
            Status::Cached,
        ]
        .iter()
        .map(|s| s.code())
        .collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_options_defaults() {
        let defaults = Budget {
            max_bytes: DEFAULT_MAX_BYTES,
            readahead_secs: DEFAULT_READAHEAD_SECS,
        };

        let budget = PreloadOptions::default().resolve(&defaults);
        assert_eq!(budget.max_bytes, 10 * 1024 * 1024);
        assert_eq!(budget.readahead_secs, 10.0);

        let budget = PreloadOptions::new(1000, -3.0).resolve(&defaults);
        assert_eq!(budget.max_bytes, 1000);
        assert_eq!(budget.readahead_secs, 10.0);

        let budget = PreloadOptions::new(0, 2.5).resolve(&defaults);
        assert_eq!(budget.max_bytes, DEFAULT_MAX_BYTES);
        assert_eq!(budget.readahead_secs, 2.5);
    }

    #[test]
    fn test_default_snapshot_is_zeroed() {
        let snap = Snapshot::default();
        assert_eq!(snap.status, Status::None);
        assert_eq!(snap.fw_bytes, 0);
        assert_eq!(snap.file_size, -1);
        assert!(!snap.eof_cached);
    }
}
