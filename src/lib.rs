//! PRELOAD - bounded media prefetch registry
//!
//! Re-exports all modules for use by the binary target.

// Core (registry, sessions, workers, notifier)
pub mod core;

// Engines
pub mod engines;

// App modules
pub mod cli;
pub mod config;
pub mod paths;
pub mod server;

// Re-export commonly used types from core
pub use core::{
    Budget, CancelToken, ClaimedSource, EngineError, MediaEngine, PreloadError, PreloadOptions,
    Registry, RegistryConfig, Snapshot, StartOutcome, Status,
};
pub use engines::FileEngine;
