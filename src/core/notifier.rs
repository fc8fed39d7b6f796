//! Status notifier: one process-owned callback slot fed by session workers.
//!
//! Workers never run the callback themselves. They push a [`StatusEvent`] into
//! a bounded channel and a dedicated dispatcher thread invokes the callback:
//!
//! ```text
//!  worker "a" ──┐
//!  worker "b" ──┼── EventSink::send ──▶ [bounded queue] ──▶ dispatcher ──▶ callback(locator, &snapshot)
//!  worker "c" ──┘
//! ```
//!
//! The callback may therefore call back into the registry (even `cancel` or
//! `claim` the very session it is told about) without deadlocking against a
//! join of the worker that produced the event.
//!
//! Only Ready, Cached and Error are ever delivered. Last `set_callback` wins;
//! `None` clears the slot.
//!
//! A callback that panics stops delivery: the panic is logged and every later
//! event is counted as dropped until a new callback is registered.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, trace, warn};
use uuid::Uuid;

use super::session::{Snapshot, Status};

/// Registered status callback.
pub type Callback = Arc<dyn Fn(&str, &Snapshot) + Send + Sync>;

/// One observable transition of one session.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// Session identity; differs between two successive sessions of one locator.
    pub session: Uuid,
    pub locator: Arc<str>,
    pub snapshot: Snapshot,
}

#[derive(Default)]
struct Pending {
    count: Mutex<u64>,
    drained: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }
}

/// Marks one dequeued event as handled when dropped.
struct Handled<'a>(&'a Pending);

impl Drop for Handled<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

struct Shared {
    callback: RwLock<Option<Callback>>,
    pending: Pending,
    dropped: AtomicU64,
    /// Last callback panicked.
    failed: AtomicBool,
}

/// Sending half handed to every worker.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<StatusEvent>,
    shared: Arc<Shared>,
}

impl EventSink {
    /// Queue an event for the dispatcher. Never blocks the worker.
    pub fn send(&self, event: StatusEvent) {
        debug_assert!(matches!(
            event.snapshot.status,
            Status::Ready | Status::Cached | Status::Error
        ));

        self.shared.pending.add();
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.shared.pending.done();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Notifier queue full, dropped {:?} event for {}",
                    event.snapshot.status, event.locator
                );
            }
            Err(TrySendError::Disconnected(event)) => {
                self.shared.pending.done();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Notifier dispatcher gone, dropped {:?} event for {}",
                    event.snapshot.status, event.locator
                );
            }
        }
    }
}

/// Callback slot plus the dispatcher thread that drives it.
pub struct Notifier {
    sink: Option<EventSink>,
    shared: Arc<Shared>,
    dispatcher: Option<thread::JoinHandle<()>>,
}

impl Notifier {
    /// Spawn the dispatcher with a queue of `queue_size` events.
    pub fn new(queue_size: usize) -> std::io::Result<Self> {
        let (tx, rx) = bounded(queue_size.max(1));
        let shared = Arc::new(Shared {
            callback: RwLock::new(None),
            pending: Pending::default(),
            dropped: AtomicU64::new(0),
            failed: AtomicBool::new(false),
        });

        let dispatcher = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("preload-notify".into())
                .spawn(move || dispatch_loop(rx, shared))?
        };

        Ok(Self {
            sink: Some(EventSink {
                tx,
                shared: Arc::clone(&shared),
            }),
            shared,
            dispatcher: Some(dispatcher),
        })
    }

    /// Replace the callback. `None` clears it.
    pub fn set_callback(&self, callback: Option<Callback>) {
        let mut slot = self.shared.callback.write().unwrap_or_else(|e| e.into_inner());
        debug!(
            "Notifier callback {}",
            if callback.is_some() { "set" } else { "cleared" }
        );
        *slot = callback;
        self.shared.failed.store(false, Ordering::SeqCst);
    }

    pub fn has_callback(&self) -> bool {
        self.shared
            .callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Sender for a new worker.
    pub fn sink(&self) -> EventSink {
        // Only None during Drop
        self.sink.clone().unwrap_or_else(|| {
            let (tx, _) = bounded(1);
            EventSink {
                tx,
                shared: Arc::clone(&self.shared),
            }
        })
    }

    /// Wait until every queued event has been dispatched.
    ///
    /// Returns `false` on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self
            .shared
            .pending
            .count
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .pending
                .drained
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            count = guard;
        }
        true
    }

    /// Events lost to a full queue, a dead dispatcher or a panicked callback.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// The current callback panicked and delivery is stopped.
    pub fn callback_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Dispatcher exits once every sender is gone
        self.sink = None;
        if let Some(handle) = self.dispatcher.take() {
            if handle.thread().id() == thread::current().id() {
                // Dropped from inside the callback: the loop ends on its own
                return;
            }
            if handle.join().is_err() {
                warn!("Notifier dispatcher panicked");
            }
        }
    }
}

fn dispatch_loop(rx: Receiver<StatusEvent>, shared: Arc<Shared>) {
    trace!("Notifier dispatcher started");
    for event in rx.iter() {
        let _handled = Handled(&shared.pending);

        if shared.failed.load(Ordering::SeqCst) {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Status callback failed earlier, dropped {:?} event for {}",
                event.snapshot.status, event.locator
            );
            continue;
        }

        let callback = shared
            .callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match callback {
            Some(cb) => {
                trace!(
                    "Dispatching {:?} for {} (fw={} total={} eof={})",
                    event.snapshot.status,
                    event.locator,
                    event.snapshot.fw_bytes,
                    event.snapshot.total_bytes,
                    event.snapshot.eof_cached
                );
                let delivered =
                    panic::catch_unwind(AssertUnwindSafe(|| cb(&event.locator, &event.snapshot)));
                if delivered.is_err() {
                    shared.failed.store(true, Ordering::SeqCst);
                    warn!(
                        "Status callback panicked on {:?} for {}, later events are dropped",
                        event.snapshot.status, event.locator
                    );
                }
            }
            None => trace!("No callback, skipping {:?} for {}", event.snapshot.status, event.locator),
        }
    }
    trace!("Notifier dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn event(locator: &str, status: Status) -> StatusEvent {
        StatusEvent {
            session: Uuid::new_v4(),
            locator: Arc::from(locator),
            snapshot: Snapshot {
                status,
                ..Snapshot::default()
            },
        }
    }

    #[test]
    fn test_callback_receives_events_in_order() {
        let notifier = Notifier::new(16).unwrap();
        let (tx, rx) = unbounded();
        notifier.set_callback(Some(Arc::new(move |locator: &str, snap: &Snapshot| {
            tx.send((locator.to_string(), snap.status)).unwrap();
        })));

        let sink = notifier.sink();
        sink.send(event("a", Status::Ready));
        sink.send(event("a", Status::Cached));
        assert!(notifier.flush(Duration::from_secs(5)));

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                ("a".to_string(), Status::Ready),
                ("a".to_string(), Status::Cached)
            ]
        );
    }

    #[test]
    fn test_cleared_callback_is_not_invoked() {
        let notifier = Notifier::new(16).unwrap();
        let (tx, rx) = unbounded();
        notifier.set_callback(Some(Arc::new(move |_: &str, snap: &Snapshot| {
            tx.send(snap.status).unwrap();
        })));
        assert!(notifier.has_callback());
        notifier.set_callback(None);
        assert!(!notifier.has_callback());

        notifier.sink().send(event("b", Status::Error));
        assert!(notifier.flush(Duration::from_secs(5)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_last_writer_wins() {
        let notifier = Notifier::new(16).unwrap();
        let (tx1, rx1) = unbounded();
        let (tx2, rx2) = unbounded();
        notifier.set_callback(Some(Arc::new(move |_: &str, _: &Snapshot| {
            tx1.send(1).unwrap();
        })));
        notifier.set_callback(Some(Arc::new(move |_: &str, _: &Snapshot| {
            tx2.send(2).unwrap();
        })));

        notifier.sink().send(event("c", Status::Ready));
        assert!(notifier.flush(Duration::from_secs(5)));
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), 2);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let notifier = Notifier::new(1).unwrap();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        notifier.set_callback(Some(Arc::new(move |_: &str, _: &Snapshot| {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        })));

        let sink = notifier.sink();
        for _ in 0..8 {
            sink.send(event("d", Status::Ready));
        }
        assert!(notifier.dropped() > 0);

        // Release the blocked callbacks
        for _ in 0..8 {
            let _ = gate_tx.send_timeout((), Duration::from_millis(200));
        }
        assert!(notifier.flush(Duration::from_secs(5)));
    }

    #[test]
    fn test_panicking_callback_stops_delivery_and_flush_still_drains() {
        let notifier = Notifier::new(16).unwrap();
        let calls = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&calls);
        notifier.set_callback(Some(Arc::new(move |_: &str, _: &Snapshot| {
            seen.fetch_add(1, Ordering::SeqCst);
            panic!("callback failure");
        })));

        let sink = notifier.sink();
        sink.send(event("e", Status::Ready));
        assert!(notifier.flush(Duration::from_secs(5)));
        assert!(notifier.callback_failed());

        sink.send(event("e", Status::Cached));
        assert!(notifier.flush(Duration::from_secs(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.dropped(), 1);
    }

    #[test]
    fn test_new_callback_resumes_after_panic() {
        let notifier = Notifier::new(16).unwrap();
        notifier.set_callback(Some(Arc::new(|_: &str, _: &Snapshot| panic!("boom"))));
        notifier.sink().send(event("f", Status::Error));
        assert!(notifier.flush(Duration::from_secs(5)));
        assert!(notifier.callback_failed());

        let (tx, rx) = unbounded();
        notifier.set_callback(Some(Arc::new(move |_: &str, snap: &Snapshot| {
            tx.send(snap.status).unwrap();
        })));
        assert!(!notifier.callback_failed());
        notifier.sink().send(event("f", Status::Ready));
        assert!(notifier.flush(Duration::from_secs(5)));
        assert_eq!(rx.try_recv().unwrap(), Status::Ready);
    }
}
