//! Common utilities for sideload-recovery
//!
//! This crate provides functionality shared between the session core and the
//! recovery binary: the error type and the tracing subscriber setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::setup_logging;
