//! Per-agent extension report
//!
//! One row per extension with its PBX state and whether it is a member of
//! any queue. Built from one queue snapshot plus one status lookup per
//! extension; a failed lookup degrades that row instead of the report.

use serde::Serialize;
use tracing::warn;

use super::{ActionCorrelator, ExtensionStatus, QueueMember};

/// Placeholder status for an extension whose lookup failed
pub const UNKNOWN_STATUS: &str = "-";

/// One row of the extension report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionReport {
    pub extension: String,
    /// Translated state, [`UNKNOWN_STATUS`] when the lookup failed
    pub status: String,
    pub on_queue: bool,
}

impl ExtensionReport {
    pub fn new(extension: &str, status: Option<ExtensionStatus>, members: &[QueueMember]) -> Self {
        Self {
            extension: extension.to_string(),
            status: status
                .map(|status| status.as_str())
                .unwrap_or(UNKNOWN_STATUS)
                .to_string(),
            on_queue: is_queue_member(extension, members),
        }
    }
}

/// Whether `extension` appears in the queue snapshot
pub fn is_queue_member(extension: &str, members: &[QueueMember]) -> bool {
    members.iter().any(|member| member.extension == extension)
}

impl ActionCorrelator {
    /// Status and queue membership of each extension, in the given order
    ///
    /// Never fails as a whole: a failed queue snapshot reports every
    /// extension off-queue, a failed status lookup reports
    /// [`UNKNOWN_STATUS`].
    pub async fn extension_report<S: AsRef<str>>(&self, extensions: &[S]) -> Vec<ExtensionReport> {
        let members = match self.queue_status(None).await {
            Ok(members) => members,
            Err(e) => {
                warn!("Queue status unavailable for extension report: {}", e);
                Vec::new()
            }
        };

        let mut report = Vec::with_capacity(extensions.len());
        for extension in extensions {
            let extension = extension.as_ref();
            let status = match self.extension_status(extension).await {
                Ok(state) => Some(state.status),
                Err(e) => {
                    warn!(extension = %extension, "Extension status unavailable: {}", e);
                    None
                }
            };
            report.push(ExtensionReport::new(extension, status, &members));
        }
        report
    }
}
