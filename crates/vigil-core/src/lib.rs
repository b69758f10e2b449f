//! vigil-core — shared building blocks for the Vigil resilience control plane.
//!
//! Holds the validated [`PolicyConfig`] tree, the error taxonomy used for
//! retry and recovery decisions ([`ErrorKind`]), and the traits through
//! which Vigil observes the outside world:
//!
//! - [`WorkerPool`]: the pool of long-lived worker sessions being kept healthy
//! - [`MemoryProbe`]: source of heap/RSS samples for leak detection
//!
//! Everything else in the workspace depends on this crate and nothing in
//! here depends on a runtime.

pub mod config;
pub mod error;
pub mod types;

pub use config::{PolicyConfig, PolicySettings};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
