//! # Call Center AMI Engine
//!
//! Integration of the call-center application with the Asterisk Manager
//! Interface (AMI).
//!
//! This crate provides:
//! - A call lifecycle tracker that follows calls of interest through the
//!   manager event stream and persists them ([`tracker`])
//! - Synchronous PBX queries: forced hangup, extension status, queue
//!   membership and the per-agent extension report ([`correlator`])
//! - The persistence gateway with MySQL and in-memory stores ([`database`])
//! - Layered configuration ([`config`]) and the error taxonomy ([`error`])
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!   PBX :5038 ◄──────┤ ami-transport client ├──── one long-lived session
//!        ▲           └──────────┬───────────┘
//!        │                      ▼
//!        │              ┌──────────────┐      ┌────────────┐
//!        │              │ CallTracker  ├─────►│ CallStore  │
//!        │              └──────────────┘      └────────────┘
//!        │
//!        └── one session per query ── ActionCorrelator (hangup, status, queues)
//! ```
//!
//! The tracker and the correlator never share a session. The tracker is the
//! only writer of its call table.

pub mod config;
pub mod correlator;
pub mod database;
pub mod error;
pub mod tracker;

pub use config::CallCenterAmiConfig;
pub use correlator::{ActionCorrelator, ExtensionState, ExtensionStatus, QueueMember};
pub use database::{CallStore, MemoryCallStore, MySqlCallStore};
pub use error::{CallCenterError, Result};
pub use tracker::{CallTracker, StepOutcome};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::config::{ActionConfig, AmiConfig, CallCenterAmiConfig, DatabaseConfig, TrackerConfig};
    pub use crate::correlator::{
        ActionCorrelator, DeviceState, ExtensionReport, ExtensionState, ExtensionStatus,
        QueueMember,
    };
    pub use crate::database::{
        CallOutcome, CallStatus, CallStore, DatabaseError, MemoryCallStore, MySqlCallStore,
    };
    pub use crate::error::{CallCenterError, Result};
    pub use crate::tracker::{CallTable, CallTracker, StepOutcome, TrackedCall};
}
