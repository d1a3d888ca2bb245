//! Queue membership snapshot (`QueueStatus`)
//!
//! The PBX answers with a `Response`, then one `QueueParams` and any number of
//! `QueueMember` events per queue, and finally `QueueStatusComplete`. The
//! snapshot is all-or-nothing: a deadline or transport failure discards the
//! rows collected so far.

use std::fmt;

use ami_transport::{Action, AmiMessage};
use serde::Serialize;
use tracing::debug;

use super::{refused, ActionCorrelator, Expectation, Verdict};
use crate::error::Result;

/// Device state reported for a queue member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceState {
    Unknown,
    NotInUse,
    InUse,
    Busy,
    Invalid,
    Unavailable,
    Ringing,
    RingInUse,
    OnHold,
}

impl DeviceState {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => DeviceState::NotInUse,
            "2" => DeviceState::InUse,
            "3" => DeviceState::Busy,
            "4" => DeviceState::Invalid,
            "5" => DeviceState::Unavailable,
            "6" => DeviceState::Ringing,
            "7" => DeviceState::RingInUse,
            "8" => DeviceState::OnHold,
            _ => DeviceState::Unknown,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One `QueueMember` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMember {
    pub queue: String,
    /// Member interface with the technology prefix removed
    pub extension: String,
    /// Display name when the PBX reports one distinct from the interface
    pub name: Option<String>,
    /// Raw `Status` value
    pub status: String,
    pub device_state: DeviceState,
    pub paused: bool,
}

impl QueueMember {
    fn from_message(message: &AmiMessage) -> Self {
        let interface = ["Location", "Interface", "StateInterface", "Name"]
            .iter()
            .map(|key| message.field(key))
            .find(|value| !value.is_empty())
            .unwrap_or_default();

        let name = ["Name", "MemberName"]
            .iter()
            .map(|key| message.field(key))
            .find(|value| !value.is_empty() && *value != interface)
            .map(str::to_string);

        let status = message.field("Status");
        Self {
            queue: message.field("Queue").to_string(),
            extension: strip_technology(interface).to_string(),
            name,
            status: status.to_string(),
            device_state: DeviceState::from_code(status),
            paused: message.field("Paused") == "1",
        }
    }
}

/// `SIP/8001` -> `8001`, `Local/8001@from-queue/n` -> `8001`
pub fn strip_technology(interface: &str) -> &str {
    let device = interface
        .split_once('/')
        .map_or(interface, |(_, device)| device);
    device.split('@').next().unwrap_or(device)
}

#[derive(Debug, Default)]
struct SnapshotCollector {
    members: Vec<QueueMember>,
}

impl SnapshotCollector {
    fn accept(&mut self, message: &AmiMessage, action_id: &str) -> Verdict<Vec<QueueMember>> {
        if let Some(error) = refused(message, action_id) {
            return Verdict::Failed(error);
        }
        // rows for other sessions' queries are never ours
        if message.action_id().is_some() && !message.correlates_to(action_id) {
            return Verdict::Pending;
        }

        if message.is_event_named("QueueMember") {
            self.members.push(QueueMember::from_message(message));
        } else if message.is_event_named("QueueStatusComplete") {
            return Verdict::Done(std::mem::take(&mut self.members));
        }
        Verdict::Pending
    }
}

impl ActionCorrelator {
    /// Members of `queue`, or of every queue when `None`
    pub async fn queue_status(&self, queue: Option<&str>) -> Result<Vec<QueueMember>> {
        let mut action = Action::new("QueueStatus").with_purpose("queuestatus");
        if let Some(queue) = queue.filter(|q| !q.is_empty()) {
            action = action.field("Queue", queue);
        }
        let action_id = action.action_id().to_string();

        let expectation = Expectation {
            deadline: self.actions().queue_timeout(),
            timeout_message: "timeout waiting for queue status",
            fault_message: None,
        };

        let mut collector = SnapshotCollector::default();
        let members = self
            .execute(action, false, expectation, |message| {
                collector.accept(message, &action_id)
            })
            .await?;

        debug!("Queue status returned {} members", members.len());
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(fields: &[(&str, &str)]) -> AmiMessage {
        AmiMessage::from_fields(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_strip_technology() {
        assert_eq!(strip_technology("SIP/8001"), "8001");
        assert_eq!(strip_technology("PJSIP/200"), "200");
        assert_eq!(strip_technology("Local/8001@from-queue/n"), "8001");
        assert_eq!(strip_technology("8001"), "8001");
    }

    #[test]
    fn test_device_state_table() {
        assert_eq!(DeviceState::from_code("1"), DeviceState::NotInUse);
        assert_eq!(DeviceState::from_code("6"), DeviceState::Ringing);
        assert_eq!(DeviceState::from_code("8"), DeviceState::OnHold);
        assert_eq!(DeviceState::from_code("0"), DeviceState::Unknown);
        assert_eq!(DeviceState::from_code(""), DeviceState::Unknown);
    }

    #[test]
    fn test_member_row_fields() {
        let member = QueueMember::from_message(&event(&[
            ("Event", "QueueMember"),
            ("Queue", "8000"),
            ("Name", "Maria"),
            ("Location", "SIP/8001"),
            ("Status", "2"),
            ("Paused", "1"),
        ]));
        assert_eq!(member.queue, "8000");
        assert_eq!(member.extension, "8001");
        assert_eq!(member.name.as_deref(), Some("Maria"));
        assert_eq!(member.device_state, DeviceState::InUse);
        assert!(member.paused);

        // older PBXs put the interface in Name
        let legacy = QueueMember::from_message(&event(&[
            ("Event", "QueueMember"),
            ("Queue", "8000"),
            ("Name", "SIP/8002"),
            ("Status", "1"),
        ]));
        assert_eq!(legacy.extension, "8002");
        assert_eq!(legacy.name, None);
        assert!(!legacy.paused);
    }

    #[test]
    fn test_collector_keeps_order_and_filters_foreign_rows() {
        let mut collector = SnapshotCollector::default();
        let ours = "queuestatus-1-1";

        for (name, id) in [("SIP/8001", ours), ("SIP/9999", "queuestatus-1-9"), ("SIP/8002", ours)] {
            let row = event(&[
                ("Event", "QueueMember"),
                ("ActionID", id),
                ("Queue", "8000"),
                ("Location", name),
                ("Status", "1"),
            ]);
            assert!(matches!(collector.accept(&row, ours), Verdict::Pending));
        }

        let done = event(&[("Event", "QueueStatusComplete"), ("ActionID", ours)]);
        match collector.accept(&done, ours) {
            Verdict::Done(members) => {
                let extensions: Vec<_> = members.iter().map(|m| m.extension.as_str()).collect();
                assert_eq!(extensions, vec!["8001", "8002"]);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }
}
