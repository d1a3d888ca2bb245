//! Extension status lookup (`ExtensionState`)

use std::fmt;

use ami_transport::{Action, AmiMessage};
use serde::Serialize;
use tracing::debug;

use super::hangup::validate_extension;
use super::{refused, ActionCorrelator, Expectation, Verdict};
use crate::error::Result;

/// Translated extension state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtensionStatus {
    Idle,
    InUse,
    Busy,
    Unavailable,
    Ringing,
    OnHold,
    Unknown,
}

impl ExtensionStatus {
    /// Translate the numeric `Status` of an `ExtensionState` reply
    ///
    /// Total: anything outside the table, including an empty string, is
    /// [`ExtensionStatus::Unknown`].
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "0" => ExtensionStatus::Idle,
            "1" => ExtensionStatus::InUse,
            "2" => ExtensionStatus::Busy,
            "4" => ExtensionStatus::Unavailable,
            "8" => ExtensionStatus::Ringing,
            "16" => ExtensionStatus::OnHold,
            _ => ExtensionStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionStatus::Idle => "Idle",
            ExtensionStatus::InUse => "InUse",
            ExtensionStatus::Busy => "Busy",
            ExtensionStatus::Unavailable => "Unavailable",
            ExtensionStatus::Ringing => "Ringing",
            ExtensionStatus::OnHold => "OnHold",
            ExtensionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an extension status lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionState {
    pub extension: String,
    /// Raw `Status` value
    pub code: String,
    pub status: ExtensionStatus,
    /// Device the extension is hinted to, e.g. `SIP/8001`
    pub hint: Option<String>,
}

fn judge_state(message: &AmiMessage, action_id: &str, extension: &str) -> Verdict<ExtensionState> {
    if let Some(error) = refused(message, action_id) {
        return Verdict::Failed(error);
    }
    if !message.correlates_to(action_id) {
        return Verdict::Pending;
    }

    let code = message.field("Status");
    if code.is_empty() {
        return Verdict::Pending;
    }
    Verdict::Done(ExtensionState {
        extension: extension.to_string(),
        code: code.to_string(),
        status: ExtensionStatus::from_code(code),
        hint: message
            .get("Hint")
            .filter(|hint| !hint.is_empty())
            .map(str::to_string),
    })
}

impl ActionCorrelator {
    /// Current state of `extension` in the configured dialplan context
    pub async fn extension_status(&self, extension: &str) -> Result<ExtensionState> {
        let extension = validate_extension(extension)?;

        let action = Action::new("ExtensionState")
            .with_purpose("extstatus")
            .field("Exten", extension)
            .field("Context", self.actions().extension_context.as_str());
        let action_id = action.action_id().to_string();

        let expectation = Expectation {
            deadline: self.actions().status_timeout(),
            timeout_message: "timeout waiting for extension status",
            fault_message: None,
        };

        let state = self
            .execute(action, false, expectation, |message| {
                judge_state(message, &action_id, extension)
            })
            .await?;

        debug!(extension = %extension, status = %state.status, "Extension status received");
        Ok(state)
    }
}
