//! Core engine types and utilities

pub mod error;
pub mod logging;
pub mod options;
pub mod statistics;
pub mod types;

pub use error::Error;
pub use options::{MapOptions, TraverseMode};
pub use statistics::{CacheStatistics, CameraStatistics};
pub use types::*;
