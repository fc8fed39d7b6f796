//! Local file engine.
//!
//! Opens plain paths or `file://` URLs. Read-ahead runs on its own thread and
//! fills an in-memory buffer up to the session's `max_bytes`, then waits for a
//! consumer to drain it (`std::io::Read` on the source). It stops on EOF, on
//! destroy, or when the session token is cancelled; a soft stop of the preload
//! worker leaves it running.
//!
//! Durations are unknown for raw bytes, so progress always reports `-1`.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use super::detect::{ContainerFormat, PROBE_BYTES, detect_container};
use crate::core::cancel::CancelToken;
use crate::core::engine::{Budget, MediaEngine, Progress, StreamInfo};
use crate::core::error::EngineError;

/// Default read size per read-ahead step (256 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// How often blocked readers re-check the cancel token.
const TOKEN_POLL: Duration = Duration::from_millis(50);

/// [`MediaEngine`] over local files.
#[derive(Debug, Clone)]
pub struct FileEngine {
    chunk_size: usize,
}

impl Default for FileEngine {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl FileEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct FileContext {
    budget: Budget,
    chunk_size: usize,
}

impl FileContext {
    pub fn budget(&self) -> &Budget {
        &self.budget
    }
}

#[derive(Debug, Default)]
struct Buffer {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes read from disk and not yet consumed.
    buffered: u64,
    consumed: u64,
    eof: bool,
    stop: bool,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct ReadState {
    buf: Mutex<Buffer>,
    cond: Condvar,
}

impl ReadState {
    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Buffer>) -> MutexGuard<'a, Buffer> {
        self.cond
            .wait_timeout(guard, TOKEN_POLL)
            .unwrap_or_else(|e| e.into_inner())
            .0
    }
}

/// Opened file with its read-ahead buffer.
pub struct FileSource {
    path: PathBuf,
    size: u64,
    format: ContainerFormat,
    streams: Vec<StreamInfo>,
    selected: Vec<bool>,
    file: Option<File>,
    max_bytes: u64,
    chunk_size: usize,
    token: CancelToken,
    state: Arc<ReadState>,
    reader: Option<thread::JoinHandle<()>>,
}

impl FileSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected.get(index).copied().unwrap_or(false)
    }

    /// Bytes handed out through `Read` so far.
    pub fn consumed(&self) -> u64 {
        self.state.lock().consumed
    }

    pub fn readahead_running(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn shutdown(&mut self) {
        {
            let mut buf = self.state.lock();
            buf.stop = true;
            self.state.cond.notify_all();
        }
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("read-ahead thread for {} panicked", self.path.display());
            }
        }
    }
}

impl Read for FileSource {
    /// Consume buffered bytes, blocking while read-ahead catches up.
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.reader.is_none() {
            return Err(io::Error::other("read-ahead not started"));
        }

        let mut buf = self.state.lock();
        loop {
            if let Some(front) = buf.chunks.front_mut() {
                let n = out.len().min(front.len());
                out[..n].copy_from_slice(&front[..n]);
                if n == front.len() {
                    buf.chunks.pop_front();
                } else {
                    front.drain(..n);
                }
                buf.buffered -= n as u64;
                buf.consumed += n as u64;
                self.state.cond.notify_all();
                return Ok(n);
            }
            if buf.eof {
                return Ok(0);
            }
            if let Some(err) = buf.error.as_ref() {
                return Err(io::Error::other(err.clone()));
            }
            if buf.stop || self.token.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "source cancelled"));
            }
            buf = self.state.wait(buf);
        }
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Map a locator to a local path.
fn resolve_path(locator: &str) -> Result<PathBuf, EngineError> {
    if let Some(path) = locator.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if locator.contains("://") {
        return Err(EngineError::Unsupported(locator.to_string()));
    }
    Ok(PathBuf::from(locator))
}

fn open_error(locator: &str, err: impl ToString) -> EngineError {
    EngineError::Open {
        locator: locator.to_string(),
        reason: err.to_string(),
    }
}

impl MediaEngine for FileEngine {
    type Context = FileContext;
    type Source = FileSource;

    fn create_context(&self, budget: &Budget) -> Result<FileContext, EngineError> {
        Ok(FileContext {
            budget: *budget,
            chunk_size: self.chunk_size,
        })
    }

    fn open(
        &self,
        locator: &str,
        token: &CancelToken,
        context: &FileContext,
    ) -> Result<FileSource, EngineError> {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let path = resolve_path(locator)?;
        let mut file = File::open(&path).map_err(|e| open_error(locator, e))?;
        let meta = file.metadata().map_err(|e| open_error(locator, e))?;
        if !meta.is_file() {
            return Err(open_error(locator, "not a regular file"));
        }

        let mut header = Vec::with_capacity(PROBE_BYTES);
        (&mut file)
            .take(PROBE_BYTES as u64)
            .read_to_end(&mut header)
            .map_err(|e| open_error(locator, e))?;
        file.seek(SeekFrom::Start(0))?;

        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let format = detect_container(&header);
        let streams: Vec<StreamInfo> = format
            .streams()
            .into_iter()
            .enumerate()
            .map(|(index, kind)| StreamInfo { index, kind })
            .collect();
        debug!(
            "Opened {} ({} bytes, {:?}, {} stream(s))",
            path.display(),
            meta.len(),
            format,
            streams.len()
        );

        Ok(FileSource {
            path,
            size: meta.len(),
            format,
            selected: vec![false; streams.len()],
            streams,
            file: Some(file),
            max_bytes: context.budget.max_bytes.max(1),
            chunk_size: context.chunk_size,
            token: token.clone(),
            state: Arc::new(ReadState::default()),
            reader: None,
        })
    }

    fn streams(&self, source: &FileSource) -> Vec<StreamInfo> {
        source.streams.clone()
    }

    fn select_stream(&self, source: &mut FileSource, index: usize, enable: bool) {
        if let Some(flag) = source.selected.get_mut(index) {
            *flag = enable;
        }
    }

    fn start_readahead(&self, source: &mut FileSource) {
        let Some(file) = source.file.take() else {
            return;
        };
        let state = Arc::clone(&source.state);
        let token = source.token.clone();
        let max_bytes = source.max_bytes;
        let chunk_size = source.chunk_size;

        let spawned = thread::Builder::new()
            .name("preload-read".into())
            .spawn(move || readahead_loop(file, state, token, max_bytes, chunk_size));
        match spawned {
            Ok(handle) => source.reader = Some(handle),
            Err(e) => {
                warn!("cannot spawn read-ahead for {}: {}", source.path.display(), e);
                source.state.lock().error = Some(e.to_string());
            }
        }
    }

    fn progress(&self, source: &FileSource) -> Progress {
        let buf = source.state.lock();
        Progress {
            fw_bytes: buf.buffered,
            total_bytes: buf.buffered,
            eof_cached: buf.eof,
            duration: -1.0,
        }
    }

    fn stream_size(&self, source: &FileSource) -> i64 {
        i64::try_from(source.size).unwrap_or(-1)
    }
}

fn readahead_loop(
    mut file: File,
    state: Arc<ReadState>,
    token: CancelToken,
    max_bytes: u64,
    chunk_size: usize,
) {
    trace!("read-ahead started (max {} bytes)", max_bytes);
    loop {
        {
            let mut buf = state.lock();
            loop {
                if buf.stop || token.is_cancelled() {
                    trace!("read-ahead stopped");
                    return;
                }
                if buf.buffered < max_bytes {
                    break;
                }
                buf = state.wait(buf);
            }
        }

        let mut chunk = vec![0u8; chunk_size];
        let n = match file.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("read-ahead failed: {}", e);
                state.lock().error = Some(e.to_string());
                state.cond.notify_all();
                return;
            }
        };

        let mut buf = state.lock();
        if n == 0 {
            buf.eof = true;
            state.cond.notify_all();
            trace!("read-ahead reached EOF");
            return;
        }
        chunk.truncate(n);
        buf.buffered += n as u64;
        buf.chunks.push_back(chunk);
        state.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::StreamKind;
    use crate::core::registry::{Registry, RegistryConfig};
    use crate::core::session::{PreloadOptions, Status};
    use std::io::Write;
    use std::time::Instant;
    use tempfile::NamedTempFile;

    fn media_file(len: usize) -> NamedTempFile {
        let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        if len >= 8 {
            data[4..8].copy_from_slice(b"ftyp");
        }
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    fn budget(max_bytes: u64) -> Budget {
        Budget {
            max_bytes,
            readahead_secs: 1.0,
        }
    }

    fn wait_progress(engine: &FileEngine, source: &FileSource, f: impl Fn(&Progress) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f(&engine.progress(source)) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_readahead_fills_to_budget() {
        let file = media_file(10_000);
        let engine = FileEngine::with_chunk_size(1000);
        let ctx = engine.create_context(&budget(4000)).unwrap();
        let token = CancelToken::new();

        let mut source = engine
            .open(file.path().to_str().unwrap(), &token, &ctx)
            .unwrap();
        assert_eq!(source.format(), ContainerFormat::Mp4);
        let kinds: Vec<_> = engine.streams(&source).iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StreamKind::Video, StreamKind::Audio]);
        assert_eq!(engine.stream_size(&source), 10_000);

        engine.start_readahead(&mut source);
        assert!(wait_progress(&engine, &source, |p| p.fw_bytes == 4000));
        thread::sleep(Duration::from_millis(20));
        let progress = engine.progress(&source);
        assert_eq!(progress.fw_bytes, 4000);
        assert!(!progress.eof_cached);
    }

    #[test]
    fn test_consumer_reads_whole_file() {
        let file = media_file(10_000);
        let expected = std::fs::read(file.path()).unwrap();
        let engine = FileEngine::with_chunk_size(1000);
        let ctx = engine.create_context(&budget(3000)).unwrap();
        let token = CancelToken::new();

        let mut source = engine
            .open(&format!("file://{}", file.path().display()), &token, &ctx)
            .unwrap();
        engine.start_readahead(&mut source);

        let mut data = Vec::new();
        source.read_to_end(&mut data).unwrap();
        assert_eq!(data, expected);
        assert_eq!(source.consumed(), 10_000);
        assert!(engine.progress(&source).eof_cached);
    }

    #[test]
    fn test_small_file_is_fully_cached() {
        let file = media_file(500);
        let engine = FileEngine::with_chunk_size(128);
        let ctx = engine.create_context(&budget(1 << 20)).unwrap();
        let mut source = engine
            .open(file.path().to_str().unwrap(), &CancelToken::new(), &ctx)
            .unwrap();

        engine.start_readahead(&mut source);
        assert!(wait_progress(&engine, &source, |p| p.eof_cached));
        assert_eq!(engine.progress(&source).fw_bytes, 500);
    }

    #[test]
    fn test_open_errors() {
        let engine = FileEngine::new();
        let ctx = engine.create_context(&budget(1000)).unwrap();
        let token = CancelToken::new();

        assert!(matches!(
            engine.open("/definitely/not/here.mkv", &token, &ctx),
            Err(EngineError::Open { .. })
        ));
        assert!(matches!(
            engine.open("http://example.com/a.mp4", &token, &ctx),
            Err(EngineError::Unsupported(_))
        ));

        let file = media_file(100);
        token.cancel();
        assert!(matches!(
            engine.open(file.path().to_str().unwrap(), &token, &ctx),
            Err(EngineError::Cancelled)
        ));
    }

    #[test]
    fn test_cancel_stops_readahead() {
        let file = media_file(10_000);
        let engine = FileEngine::with_chunk_size(1000);
        let ctx = engine.create_context(&budget(2000)).unwrap();
        let token = CancelToken::new();
        let mut source = engine
            .open(file.path().to_str().unwrap(), &token, &ctx)
            .unwrap();
        engine.start_readahead(&mut source);
        assert!(wait_progress(&engine, &source, |p| p.fw_bytes == 2000));

        token.cancel();
        let deadline = Instant::now() + Duration::from_secs(5);
        while source.readahead_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!source.readahead_running());
        engine.cancel_and_destroy(source, &token);
    }

    #[test]
    fn test_registry_handoff_keeps_reading() {
        let file = media_file(20_000);
        let expected = std::fs::read(file.path()).unwrap();
        let locator = file.path().to_str().unwrap().to_string();

        let engine = Arc::new(FileEngine::with_chunk_size(1000));
        let config = RegistryConfig {
            poll_interval: Duration::from_millis(10),
            ..RegistryConfig::default()
        };
        let reg = Registry::new(engine, config).unwrap();

        reg.start(&locator, PreloadOptions::new(5000, 1.0)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while reg.info_or_default(&locator).status != Status::Cached && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let info = reg.get_info(&locator).unwrap();
        assert_eq!(info.status, Status::Cached);
        assert_eq!(info.file_size, 20_000);

        let mut claimed = reg.claim(&locator).unwrap();
        assert!(claimed.source().is_selected(0));
        assert!(claimed.source().is_selected(1));
        assert!(claimed.source().readahead_running());

        let mut data = Vec::new();
        claimed.source_mut().read_to_end(&mut data).unwrap();
        assert_eq!(data, expected);
    }
}
