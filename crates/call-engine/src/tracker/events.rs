//! Channel events the tracker acts on

use std::fmt;

use ami_transport::AmiMessage;

use crate::error::{CallCenterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventKind {
    Newchannel,
    Hangup,
    BridgeEnter,
    BridgeLeave,
}

impl ChannelEventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Newchannel" => Some(Self::Newchannel),
            "Hangup" => Some(Self::Hangup),
            "BridgeEnter" => Some(Self::BridgeEnter),
            "BridgeLeave" => Some(Self::BridgeLeave),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newchannel => "Newchannel",
            Self::Hangup => "Hangup",
            Self::BridgeEnter => "BridgeEnter",
            Self::BridgeLeave => "BridgeLeave",
        }
    }
}

impl fmt::Display for ChannelEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fields of a channel event the state machine reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub kind: ChannelEventKind,
    /// Identifier of this leg
    pub unique_id: String,
    /// Identifier shared by every leg of the call
    pub linked_id: String,
    pub caller_number: String,
    pub context: String,
    pub exten: String,
    pub channel: String,
    pub connected_line_number: String,
}

impl ChannelEvent {
    /// Extract a channel event from a received message
    ///
    /// `Ok(None)` for responses and for events the tracker does not handle.
    /// Handled events without `Uniqueid` or `Linkedid` are malformed.
    pub fn parse(message: &AmiMessage) -> Result<Option<Self>> {
        if !message.is_event() {
            return Ok(None);
        }
        let Some(kind) = ChannelEventKind::from_name(message.event_name()) else {
            return Ok(None);
        };

        let unique_id = required(message, kind, "Uniqueid")?;
        let linked_id = required(message, kind, "Linkedid")?;

        Ok(Some(Self {
            kind,
            unique_id,
            linked_id,
            caller_number: message.field("CallerIDNum").to_string(),
            context: message.field("Context").to_string(),
            exten: message.field("Exten").to_string(),
            channel: message.field("Channel").to_string(),
            connected_line_number: message.field("ConnectedLineNum").to_string(),
        }))
    }

    /// The first leg of a call carries the call's own identifier
    pub fn is_originating_leg(&self) -> bool {
        self.unique_id == self.linked_id
    }
}

fn required(message: &AmiMessage, kind: ChannelEventKind, key: &str) -> Result<String> {
    match message.field(key).trim() {
        "" => Err(CallCenterError::MalformedEvent(format!(
            "{} event without {}",
            kind, key
        ))),
        value => Ok(value.to_string()),
    }
}
