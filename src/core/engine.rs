//! Media source engine contract.
//!
//! The registry never opens, demuxes or downloads anything itself. All of that
//! is delegated to a [`MediaEngine`] implementation; the worker drives it
//! through the calls below and the registry only moves the resulting
//! `Context`/`Source` values around.
//!
//! Implementations live in `crate::engines`.

use super::cancel::CancelToken;
use super::error::EngineError;

/// Budget a session was started with (already defaulted).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    /// Read-ahead byte target; reaching it flips the session to Cached.
    pub max_bytes: u64,
    /// Read-ahead duration target in seconds.
    pub readahead_secs: f64,
}

/// Elementary stream category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
}

/// One elementary stream exposed by an opened source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
}

impl StreamInfo {
    /// Streams the worker selects for read-ahead.
    pub fn is_av(&self) -> bool {
        matches!(self.kind, StreamKind::Video | StreamKind::Audio)
    }
}

/// Point-in-time read-ahead state reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    /// Bytes cached ahead of the read position.
    pub fw_bytes: u64,
    /// Bytes held in the engine's buffer.
    pub total_bytes: u64,
    /// Whole source is cached.
    pub eof_cached: bool,
    /// Buffered duration in seconds, negative if unknown.
    pub duration: f64,
}

/// Collaborator performing the actual source I/O.
///
/// `Context` is created per session and must be independently destructible.
/// `Source` is the opened handle that eventually gets handed off to a player.
/// Both are moved between threads (worker, registry, claimer) but never shared.
pub trait MediaEngine: Send + Sync + 'static {
    type Context: Send + 'static;
    type Source: Send + 'static;

    /// Create an isolated context sized by the session budget.
    fn create_context(&self, budget: &Budget) -> Result<Self::Context, EngineError>;

    /// Open `locator`. Must return promptly with an error once `token` is cancelled.
    fn open(
        &self,
        locator: &str,
        token: &CancelToken,
        context: &Self::Context,
    ) -> Result<Self::Source, EngineError>;

    fn streams(&self, source: &Self::Source) -> Vec<StreamInfo>;

    fn select_stream(&self, source: &mut Self::Source, index: usize, enable: bool);

    /// Kick off background read-ahead. Must not block.
    fn start_readahead(&self, source: &mut Self::Source);

    fn progress(&self, source: &Self::Source) -> Progress;

    /// Total size of the underlying byte stream, `-1` if unknown.
    fn stream_size(&self, source: &Self::Source) -> i64;

    /// Release a source whose I/O may still be running.
    fn destroy(&self, source: Self::Source) {
        drop(source);
    }

    /// Abort in-flight I/O through `token`, then release the source.
    fn cancel_and_destroy(&self, source: Self::Source, token: &CancelToken) {
        token.cancel();
        self.destroy(source);
    }
}
