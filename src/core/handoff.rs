//! Caller-owned result of a successful claim.
//!
//! A [`ClaimedSource`] bundles the opened source with the engine context and
//! cancel token it was opened under. Their lifetimes now follow the source:
//! dropping the claim destroys the source first, then the context and token.
//! Read-ahead started by the preload worker keeps running until then.

use std::fmt;
use std::sync::Arc;

use log::debug;

use super::cancel::CancelToken;
use super::engine::{MediaEngine, Progress};

pub struct ClaimedSource<E: MediaEngine> {
    engine: Arc<E>,
    locator: String,
    source: Option<E::Source>,
    context: Option<E::Context>,
    token: CancelToken,
}

impl<E: MediaEngine> ClaimedSource<E> {
    pub(crate) fn new(
        engine: Arc<E>,
        locator: String,
        source: E::Source,
        context: Option<E::Context>,
        token: CancelToken,
    ) -> Self {
        Self {
            engine,
            locator,
            source: Some(source),
            context,
            token,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn source(&self) -> &E::Source {
        self.source.as_ref().expect("claimed source present until drop")
    }

    pub fn source_mut(&mut self) -> &mut E::Source {
        self.source.as_mut().expect("claimed source present until drop")
    }

    /// Token the source was opened under. Cancelling it aborts its I/O.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn progress(&self) -> Progress {
        self.engine.progress(self.source())
    }

    /// Take the raw parts; the caller becomes responsible for releasing them.
    pub fn into_parts(mut self) -> (E::Source, Option<E::Context>, CancelToken) {
        let source = self.source.take().expect("claimed source present until drop");
        let context = self.context.take();
        (source, context, self.token.clone())
    }
}

impl<E: MediaEngine> fmt::Debug for ClaimedSource<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimedSource")
            .field("locator", &self.locator)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<E: MediaEngine> Drop for ClaimedSource<E> {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            debug!("Releasing claimed source {}", self.locator);
            self.engine.destroy(source);
        }
        // Context outlives the source it backed
        self.context.take();
    }
}
