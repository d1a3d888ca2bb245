//! Common infrastructure shared by the call center AMI services
//!
//! Currently this is the logging bootstrap every binary runs first and the
//! small error type it reports with.

pub mod errors;
pub mod logging;

pub use errors::types::{Error, Result};
pub use logging::setup::{setup_logging, LoggingConfig, LoggingGuard};
