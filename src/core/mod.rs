//! Preload core - registry, sessions, workers and notifications
//!
//! Independent of any concrete media stack: everything is generic over
//! [`MediaEngine`].

pub mod cancel;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod handoff;
pub mod notifier;
pub mod registry;
pub mod session;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use engine::{Budget, MediaEngine, Progress, StreamInfo, StreamKind};
pub use error::{EngineError, PreloadError};
pub use handoff::ClaimedSource;
pub use notifier::{Callback, Notifier};
pub use registry::{Registry, RegistryConfig, StartOutcome};
pub use session::{PreloadOptions, Snapshot, Status};
