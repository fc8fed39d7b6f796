//! Scripted in-memory engine for registry tests.
//!
//! Each locator follows a [`MockPlan`]: how long `open` takes, whether it
//! fails, which streams exist and how much read-ahead is reported once it
//! starts. Every opened source shares a [`MockIo`] with the engine so tests
//! can inspect what happened to it after a claim or cancel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::cancel::CancelToken;
use super::engine::{Budget, MediaEngine, Progress, StreamInfo, StreamKind};
use super::error::EngineError;

#[derive(Debug, Clone)]
pub struct MockPlan {
    pub open_delay: Duration,
    /// Finish the open delay even if the token is cancelled meanwhile.
    pub ignore_cancel: bool,
    pub fail: bool,
    pub streams: Vec<StreamKind>,
    /// fw_bytes reported as soon as read-ahead starts.
    pub fw_bytes: u64,
    pub eof_cached: bool,
    pub size: i64,
}

impl Default for MockPlan {
    fn default() -> Self {
        Self {
            open_delay: Duration::ZERO,
            ignore_cancel: false,
            fail: false,
            streams: vec![StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle],
            fw_bytes: 0,
            eof_cached: false,
            size: 4096,
        }
    }
}

/// Observable I/O state of one opened source.
#[derive(Debug, Default)]
pub struct MockIo {
    pub fw_bytes: AtomicU64,
    pub eof_cached: AtomicBool,
    pub readahead_running: AtomicBool,
    pub aborted: AtomicBool,
    pub destroyed: AtomicBool,
    pub selected: Mutex<Vec<usize>>,
}

impl MockIo {
    pub fn set_fw_bytes(&self, bytes: u64) {
        self.fw_bytes.store(bytes, Ordering::SeqCst);
    }

    pub fn running(&self) -> bool {
        self.readahead_running.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

pub struct MockContext {
    live: Arc<AtomicUsize>,
}

impl Drop for MockContext {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockSource {
    pub locator: String,
    pub plan: MockPlan,
    pub io: Arc<MockIo>,
}

#[derive(Default)]
pub struct MockEngine {
    plans: Mutex<HashMap<String, MockPlan>>,
    ios: Mutex<HashMap<String, Arc<MockIo>>>,
    pub opened: AtomicUsize,
    pub live_contexts: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self, locator: &str, plan: MockPlan) {
        self.plans.lock().unwrap().insert(locator.to_string(), plan);
    }

    /// I/O state of the most recent source opened for `locator`.
    pub fn io(&self, locator: &str) -> Option<Arc<MockIo>> {
        self.ios.lock().unwrap().get(locator).cloned()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }
}

impl MediaEngine for MockEngine {
    type Context = MockContext;
    type Source = MockSource;

    fn create_context(&self, _budget: &Budget) -> Result<MockContext, EngineError> {
        self.live_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(MockContext {
            live: Arc::clone(&self.live_contexts),
        })
    }

    fn open(
        &self,
        locator: &str,
        token: &CancelToken,
        _context: &MockContext,
    ) -> Result<MockSource, EngineError> {
        let plan = self
            .plans
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .unwrap_or_default();

        if plan.ignore_cancel {
            std::thread::sleep(plan.open_delay);
        } else {
            if !plan.open_delay.is_zero() && token.wait_timeout(plan.open_delay) {
                return Err(EngineError::Cancelled);
            }
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
        }
        if plan.fail {
            return Err(EngineError::Open {
                locator: locator.to_string(),
                reason: "scripted failure".into(),
            });
        }

        let io = Arc::new(MockIo::default());
        self.ios
            .lock()
            .unwrap()
            .insert(locator.to_string(), Arc::clone(&io));
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockSource {
            locator: locator.to_string(),
            plan,
            io,
        })
    }

    fn streams(&self, source: &MockSource) -> Vec<StreamInfo> {
        source
            .plan
            .streams
            .iter()
            .enumerate()
            .map(|(index, &kind)| StreamInfo { index, kind })
            .collect()
    }

    fn select_stream(&self, source: &mut MockSource, index: usize, enable: bool) {
        if enable {
            source.io.selected.lock().unwrap().push(index);
        }
    }

    fn start_readahead(&self, source: &mut MockSource) {
        source.io.readahead_running.store(true, Ordering::SeqCst);
        source.io.set_fw_bytes(source.plan.fw_bytes);
        source
            .io
            .eof_cached
            .store(source.plan.eof_cached, Ordering::SeqCst);
    }

    fn progress(&self, source: &MockSource) -> Progress {
        let fw = source.io.fw_bytes.load(Ordering::SeqCst);
        Progress {
            fw_bytes: fw,
            total_bytes: fw,
            eof_cached: source.io.eof_cached.load(Ordering::SeqCst),
            duration: -1.0,
        }
    }

    fn stream_size(&self, source: &MockSource) -> i64 {
        source.plan.size
    }

    fn destroy(&self, source: MockSource) {
        source.io.readahead_running.store(false, Ordering::SeqCst);
        source.io.destroyed.store(true, Ordering::SeqCst);
    }

    fn cancel_and_destroy(&self, source: MockSource, token: &CancelToken) {
        token.cancel();
        source.io.aborted.store(true, Ordering::SeqCst);
        self.destroy(source);
    }
}
