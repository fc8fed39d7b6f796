//! Concrete [`MediaEngine`](crate::core::MediaEngine) implementations.

pub mod detect;
pub mod file;

pub use detect::{ContainerFormat, detect_container};
pub use file::{FileContext, FileEngine, FileSource};
