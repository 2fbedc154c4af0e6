//! # weft-common
//!
//! Shared types for the Weft host network plumbing.
//!
//! This crate provides:
//! - The error taxonomy used by every Weft crate
//! - Standard sysfs/procfs paths, overridable for tests

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{WeftError, WeftResult};
pub use paths::HostPaths;
