//! Session registry: fixed-capacity slot table of prefetch sessions.
//!
//! **Why**: a player wants to hand off an already-open, already-buffering
//! source the moment the user presses play. The registry keeps up to
//! `capacity` such sessions alive in the background, one worker thread each.
//!
//! **Locking**: one mutex guards the slot table. It is held for bookkeeping
//! only, never across a worker join or an engine call. Every stop path first
//! detaches the entry into a `Reserved` slot under the lock, then joins and
//! releases resources unlocked, then frees the slot. A reserved slot has no
//! locator, so it is invisible to lookups but still counts against capacity.
//! A `start` that finds only reserved slots waits on `slot_changed` until one
//! of them is freed or reoccupied.
//!
//! # Stop paths
//!
//! | Operation   | Stop kind | Resources afterwards       |
//! |-------------|-----------|----------------------------|
//! | `cancel`    | hard      | destroyed                  |
//! | `clear_all` | hard      | destroyed                  |
//! | eviction    | hard      | destroyed                  |
//! | `claim`     | soft      | moved to the caller        |

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::engine::{Budget, MediaEngine};
use super::error::PreloadError;
use super::eviction::{Candidate, select_victim};
use super::handoff::ClaimedSource;
use super::notifier::{Callback, Notifier};
use super::session::{
    DEFAULT_MAX_BYTES, DEFAULT_READAHEAD_SECS, PreloadOptions, SessionCell, Snapshot, Status,
};
use super::worker::Worker;

/// Default number of concurrent sessions.
pub const MAX_ENTRIES: usize = 4;

/// Default worker poll interval for progress checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default notifier queue length.
pub const EVENT_QUEUE: usize = 256;

/// Runtime parameters of a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistryConfig {
    pub capacity: usize,
    pub poll_interval: Duration,
    /// Budget applied to unset/non-positive start options.
    pub defaults: Budget,
    pub event_queue: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_ENTRIES,
            poll_interval: POLL_INTERVAL,
            defaults: Budget {
                max_bytes: DEFAULT_MAX_BYTES,
                readahead_secs: DEFAULT_READAHEAD_SECS,
            },
            event_queue: EVENT_QUEUE,
        }
    }
}

/// Result of a successful `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// New session created, worker spawned.
    Started,
    /// A session for this locator already exists. Nothing changed.
    AlreadyActive,
}

struct Entry<E: MediaEngine> {
    cell: Arc<SessionCell<E>>,
    worker: Option<thread::JoinHandle<()>>,
    created_at: Instant,
    seq: u64,
}

enum Slot<E: MediaEngine> {
    Free,
    /// Being torn down or handed off outside the lock.
    Reserved,
    Occupied(Entry<E>),
}

struct Table<E: MediaEngine> {
    slots: Vec<Slot<E>>,
    next_seq: u64,
}

impl<E: MediaEngine> Table<E> {
    fn find(&self, locator: &str) -> Option<usize> {
        self.slots.iter().position(|slot| match slot {
            Slot::Occupied(entry) => &*entry.cell.locator == locator,
            _ => false,
        })
    }

    fn entry(&self, idx: usize) -> Option<&Entry<E>> {
        match self.slots.get(idx) {
            Some(Slot::Occupied(entry)) => Some(entry),
            _ => None,
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| matches!(slot, Slot::Free))
    }

    fn candidates(&self) -> impl Iterator<Item = Candidate> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, s)| match s {
            Slot::Occupied(entry) => Some(Candidate {
                slot,
                created: entry.seq,
            }),
            _ => None,
        })
    }

    /// Take the entry out, leaving the slot reserved.
    fn detach(&mut self, idx: usize) -> Option<Entry<E>> {
        match std::mem::replace(&mut self.slots[idx], Slot::Reserved) {
            Slot::Occupied(entry) => Some(entry),
            other => {
                self.slots[idx] = other;
                None
            }
        }
    }

    fn release(&mut self, idx: usize) {
        debug_assert!(matches!(self.slots[idx], Slot::Reserved));
        self.slots[idx] = Slot::Free;
    }
}

/// Bounded registry of background prefetch sessions.
///
/// # Example
/// ```ignore
/// let registry = Registry::new(Arc::new(FileEngine::new()), RegistryConfig::default())?;
/// registry.start("/media/next.mkv", PreloadOptions::default())?;
///
/// // Later, when the user hits play:
/// if let Some(claimed) = registry.claim("/media/next.mkv") {
///     player.play_from(claimed);
/// }
/// ```
pub struct Registry<E: MediaEngine> {
    engine: Arc<E>,
    config: RegistryConfig,
    table: Mutex<Table<E>>,
    /// Signalled whenever a slot leaves the `Reserved` state.
    slot_changed: Condvar,
    notifier: Notifier,
    #[cfg(test)]
    refuse_spawn: std::sync::atomic::AtomicBool,
}

impl<E: MediaEngine> Registry<E> {
    /// Create a registry and its notifier dispatcher.
    pub fn new(engine: Arc<E>, config: RegistryConfig) -> std::io::Result<Self> {
        let notifier = Notifier::new(config.event_queue)?;
        let slots = (0..config.capacity).map(|_| Slot::Free).collect();

        info!(
            "Preload registry init: capacity={}, poll={}ms, default budget={} MB / {}s",
            config.capacity,
            config.poll_interval.as_millis(),
            config.defaults.max_bytes / 1024 / 1024,
            config.defaults.readahead_secs
        );

        Ok(Self {
            engine,
            config,
            table: Mutex::new(Table { slots, next_seq: 0 }),
            slot_changed: Condvar::new(),
            notifier,
            #[cfg(test)]
            refuse_spawn: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Table<E>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Free a reserved slot and wake starts waiting for one.
    fn release_slot(&self, idx: usize) {
        let mut table = self.lock();
        table.release(idx);
        drop(table);
        self.slot_changed.notify_all();
    }

    fn spawn_worker(&self, idx: usize, worker: Worker<E>) -> std::io::Result<thread::JoinHandle<()>> {
        #[cfg(test)]
        if self.refuse_spawn.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::other("worker spawn refused"));
        }
        thread::Builder::new()
            .name(format!("preload-{}", idx))
            .spawn(move || worker.run())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Register the status callback (last writer wins, `None` clears).
    pub fn set_callback(&self, callback: Option<Callback>) {
        self.notifier.set_callback(callback);
    }

    /// Start prefetching `locator` in the background.
    ///
    /// Evicts the oldest session when the table is full. Returns right after
    /// spawning the worker unless an eviction had to join a victim, or every
    /// slot was mid-teardown on another thread and had to be waited for.
    pub fn start(&self, locator: &str, options: PreloadOptions) -> Result<StartOutcome, PreloadError> {
        if locator.is_empty() {
            return Err(PreloadError::InvalidArgument("empty locator"));
        }
        let budget = options.resolve(&self.config.defaults);

        let mut table = self.lock();
        let idx = loop {
            if table.find(locator).is_some() {
                debug!("preload start {}: already active", locator);
                return Ok(StartOutcome::AlreadyActive);
            }
            if let Some(idx) = table.free_slot() {
                break idx;
            }
            if let Some(victim_idx) = select_victim(table.candidates()) {
                let Some(victim) = table.detach(victim_idx) else {
                    continue;
                };
                victim.cell.request_hard_cancel();
                drop(table);

                info!(
                    "Evicting preload {} (age {} ms) for {}",
                    victim.cell.locator,
                    victim.created_at.elapsed().as_millis(),
                    locator
                );
                self.destroy(victim);

                table = self.lock();
                if table.find(locator).is_some() {
                    // Raced with another start of the same locator
                    table.release(victim_idx);
                    drop(table);
                    self.slot_changed.notify_all();
                    return Ok(StartOutcome::AlreadyActive);
                }
                break victim_idx;
            }
            if table.slots.is_empty() {
                warn!("preload start {}: registry has no slots", locator);
                return Err(PreloadError::NoCapacity(locator.to_string()));
            }
            // Every slot is being torn down or handed off by another thread
            debug!("preload start {}: waiting for a reserved slot", locator);
            table = self
                .slot_changed
                .wait(table)
                .unwrap_or_else(|e| e.into_inner());
        };

        let cell = Arc::new(SessionCell::new(locator, budget));
        let worker = Worker {
            engine: Arc::clone(&self.engine),
            cell: Arc::clone(&cell),
            events: self.notifier.sink(),
            poll_interval: self.config.poll_interval,
        };

        let outcome = match self.spawn_worker(idx, worker) {
            Ok(handle) => {
                let seq = table.next_seq;
                table.next_seq += 1;
                info!(
                    "Preload started: {} (slot {}, session {}, budget {} bytes / {}s)",
                    locator, idx, cell.id, budget.max_bytes, budget.readahead_secs
                );
                table.slots[idx] = Slot::Occupied(Entry {
                    cell,
                    worker: Some(handle),
                    created_at: Instant::now(),
                    seq,
                });
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                warn!("preload start {}: cannot spawn worker: {}", locator, e);
                table.slots[idx] = Slot::Free;
                Err(PreloadError::NoCapacity(locator.to_string()))
            }
        };
        drop(table);
        self.slot_changed.notify_all();
        outcome
    }

    /// Consistent snapshot of status and engine progress. Never waits for the worker.
    pub fn get_info(&self, locator: &str) -> Result<Snapshot, PreloadError> {
        if locator.is_empty() {
            return Err(PreloadError::InvalidArgument("empty locator"));
        }
        let table = self.lock();
        let idx = table
            .find(locator)
            .ok_or_else(|| PreloadError::NotFound(locator.to_string()))?;
        let entry = table
            .entry(idx)
            .ok_or_else(|| PreloadError::NotFound(locator.to_string()))?;
        Ok(entry.cell.snapshot(&self.engine))
    }

    /// Like [`get_info`](Self::get_info), but a zeroed `None` snapshot when absent.
    pub fn info_or_default(&self, locator: &str) -> Snapshot {
        self.get_info(locator).unwrap_or_default()
    }

    /// Snapshots of every live session, in slot order.
    pub fn snapshots(&self) -> Vec<(String, Snapshot)> {
        let table = self.lock();
        table
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Occupied(entry) => Some((
                    entry.cell.locator.to_string(),
                    entry.cell.snapshot(&self.engine),
                )),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.lock().find(locator).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Occupied(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hard-cancel a session and release everything it owns.
    ///
    /// Blocks until the worker has exited.
    pub fn cancel(&self, locator: &str) -> Result<(), PreloadError> {
        if locator.is_empty() {
            return Err(PreloadError::InvalidArgument("empty locator"));
        }
        let (idx, entry) = {
            let mut table = self.lock();
            let idx = table
                .find(locator)
                .ok_or_else(|| PreloadError::NotFound(locator.to_string()))?;
            let entry = table
                .detach(idx)
                .ok_or_else(|| PreloadError::NotFound(locator.to_string()))?;
            entry.cell.request_hard_cancel();
            (idx, entry)
        };

        info!("Preload cancelled: {}", locator);
        self.destroy(entry);
        self.release_slot(idx);
        Ok(())
    }

    /// Take exclusive ownership of a session's source.
    ///
    /// The worker is stopped softly: engine read-ahead keeps running for the
    /// new owner. Returns `None` if there is no session or it has no open
    /// source yet (still opening, or failed).
    pub fn claim(&self, locator: &str) -> Option<ClaimedSource<E>> {
        if locator.is_empty() {
            return None;
        }
        let (idx, mut entry) = {
            let mut table = self.lock();
            let idx = table.find(locator)?;
            let entry = table.entry(idx)?;
            let status = entry.cell.status();
            if matches!(status, Status::None | Status::Error) || !entry.cell.has_source() {
                debug!("preload claim {}: not claimable ({:?})", locator, status);
                return None;
            }
            entry.cell.request_soft_stop();
            let entry = table.detach(idx)?;
            (idx, entry)
        };

        join_worker(&mut entry);

        let (source, context) = entry.cell.take_resources();
        self.release_slot(idx);

        let Some(source) = source else {
            warn!("preload claim {}: source vanished during handoff", locator);
            return None;
        };

        info!(
            "Preload claimed: {} (session {}, age {} ms)",
            locator,
            entry.cell.id,
            entry.created_at.elapsed().as_millis()
        );
        Some(ClaimedSource::new(
            Arc::clone(&self.engine),
            locator.to_string(),
            source,
            context,
            entry.cell.token.clone(),
        ))
    }

    /// Hard-cancel every session, join all workers, then release everything.
    pub fn clear_all(&self) {
        let detached: Vec<(usize, Entry<E>)> = {
            let mut table = self.lock();
            let occupied: Vec<usize> = table.candidates().map(|c| c.slot).collect();
            occupied
                .into_iter()
                .filter_map(|idx| {
                    let entry = table.detach(idx)?;
                    entry.cell.request_hard_cancel();
                    Some((idx, entry))
                })
                .collect()
        };

        if detached.is_empty() {
            return;
        }
        info!("Clearing {} preload session(s)", detached.len());

        let mut detached = detached;
        for (_, entry) in detached.iter_mut() {
            join_worker(entry);
        }

        let mut slots = Vec::with_capacity(detached.len());
        for (idx, entry) in detached {
            self.release_resources(entry);
            slots.push(idx);
        }

        let mut table = self.lock();
        for idx in slots {
            table.release(idx);
        }
        drop(table);
        self.slot_changed.notify_all();
    }

    /// Join the worker and destroy what the entry owns. Caller holds no lock.
    fn destroy(&self, mut entry: Entry<E>) {
        join_worker(&mut entry);
        self.release_resources(entry);
    }

    fn release_resources(&self, entry: Entry<E>) {
        let (source, context) = entry.cell.take_resources();
        if let Some(source) = source {
            self.engine.cancel_and_destroy(source, &entry.cell.token);
        }
        drop(context);
        debug!("Preload resources released: {}", entry.cell.locator);
    }
}

fn join_worker<E: MediaEngine>(entry: &mut Entry<E>) {
    if let Some(handle) = entry.worker.take() {
        if handle.join().is_err() {
            warn!("preload worker for {} panicked", entry.cell.locator);
        }
    }
}

impl<E: MediaEngine> Drop for Registry<E> {
    fn drop(&mut self) {
        self.clear_all();
    }
}
