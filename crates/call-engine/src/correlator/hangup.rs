//! Forced hangup of every channel on an extension
//!
//! The PBX does not echo the action id on the `Hangup` event, so success is
//! recognised by effect: a `Hangup` event for a channel of the extension.

use ami_transport::{Action, AmiMessage};
use tracing::info;

use super::{refused, ActionCorrelator, Expectation, Verdict};
use crate::error::{CallCenterError, Result};

const TIMEOUT_MESSAGE: &str = "timeout waiting for hangup call";
const FAULT_MESSAGE: &str = "an error occurred executing the command";
const NO_SUCH_CHANNEL: &str = "No such channel";

/// Channel regex understood by the `Hangup` action, e.g. `/^SIP/8001-.*$/`
pub fn hangup_channel_pattern(technology: &str, extension: &str) -> String {
    format!("/^{}/{}-.*$/", technology, extension)
}

/// Extensions are dial strings: digits, `*` and `#`
pub fn validate_extension(extension: &str) -> Result<&str> {
    let extension = extension.trim();
    if extension.is_empty() {
        return Err(CallCenterError::invalid_input("extension must not be empty"));
    }
    if !extension
        .chars()
        .all(|c| c.is_ascii_digit() || c == '*' || c == '#')
    {
        return Err(CallCenterError::invalid_input(format!(
            "invalid extension '{}'",
            extension
        )));
    }
    Ok(extension)
}

// Channel names look like SIP/8001-0000002a
fn is_extension_channel(channel: &str, technology: &str, extension: &str) -> bool {
    channel
        .split_once('/')
        .filter(|(tech, _)| tech.eq_ignore_ascii_case(technology))
        .and_then(|(_, rest)| rest.strip_prefix(extension))
        .is_some_and(|rest| rest.starts_with('-'))
}

fn judge_hangup(
    message: &AmiMessage,
    action_id: &str,
    technology: &str,
    extension: &str,
) -> Verdict<()> {
    if message.is_event_named("Hangup")
        && is_extension_channel(message.field("Channel"), technology, extension)
    {
        return Verdict::Done(());
    }
    if message.field("Message").eq_ignore_ascii_case(NO_SUCH_CHANNEL) {
        return Verdict::Failed(CallCenterError::protocol(format!(
            "no open channel on extension {}",
            extension
        )));
    }
    match refused(message, action_id) {
        Some(error) => Verdict::Failed(error),
        None => Verdict::Pending,
    }
}

impl ActionCorrelator {
    /// Hang up the open channels of `extension`
    ///
    /// Waits for the PBX to report the hangup; errors carry the message shown
    /// to the operator.
    pub async fn hangup(&self, extension: &str) -> Result<()> {
        let extension = validate_extension(extension)?;
        let technology = self.actions().channel_technology.as_str();

        let action = Action::new("Hangup")
            .with_purpose("hangupcall")
            .field("Channel", hangup_channel_pattern(technology, extension));
        let action_id = action.action_id().to_string();

        let expectation = Expectation {
            deadline: self.actions().hangup_timeout(),
            timeout_message: TIMEOUT_MESSAGE,
            fault_message: Some(FAULT_MESSAGE),
        };

        self.execute(action, true, expectation, |message| {
            judge_hangup(message, &action_id, technology, extension)
        })
        .await?;

        info!(extension = %extension, "Extension hung up");
        Ok(())
    }
}
