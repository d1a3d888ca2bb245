//! Parsed manager messages
//!
//! A manager message is a flat list of `Key: Value` pairs. The presence of an
//! `Event` key makes it an unsolicited event, a `Response` key makes it the
//! reply to an action we sent. Anything else is kept as [`MessageKind::Unknown`]
//! so consumers can still inspect it.

use std::fmt;

use serde::Serialize;

/// Classification of a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    /// Asynchronous notification (`Event: ...`)
    Event,
    /// Reply to an action (`Response: ...`)
    Response,
    /// Neither key present
    Unknown,
}

/// An immutable manager message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmiMessage {
    kind: MessageKind,
    action_id: Option<String>,
    fields: Vec<(String, String)>,
}

impl AmiMessage {
    /// Build a message from its fields, classifying it on the way
    pub fn from_fields(fields: Vec<(String, String)>) -> Self {
        let lookup = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
        };

        let kind = if lookup("Event").is_some() {
            MessageKind::Event
        } else if lookup("Response").is_some() {
            MessageKind::Response
        } else {
            MessageKind::Unknown
        };
        let action_id = lookup("ActionID").filter(|id| !id.is_empty());

        Self {
            kind,
            action_id,
            fields,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }

    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// The `ActionID` this message carries, if any
    pub fn action_id(&self) -> Option<&str> {
        self.action_id.as_deref()
    }

    /// Whether this message answers the given action id
    pub fn correlates_to(&self, action_id: &str) -> bool {
        self.action_id() == Some(action_id)
    }

    /// First value for `key`, compared case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Value for `key`, or the empty string when absent
    pub fn field(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// The `Event` name, empty for responses
    pub fn event_name(&self) -> &str {
        self.field("Event")
    }

    /// The `Response` value (`Success`, `Error`, `Follows`...)
    pub fn response(&self) -> &str {
        self.field("Response")
    }

    /// Whether this is an event with the given name
    pub fn is_event_named(&self, name: &str) -> bool {
        self.is_event() && self.event_name().eq_ignore_ascii_case(name)
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

impl fmt::Display for AmiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(pairs: &[(&str, &str)]) -> AmiMessage {
        AmiMessage::from_fields(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_classifies_events_and_responses() {
        let event = msg(&[("Event", "Newchannel"), ("Linkedid", "1.1")]);
        assert!(event.is_event());
        assert_eq!(event.event_name(), "Newchannel");
        assert!(event.action_id().is_none());

        let response = msg(&[("Response", "Success"), ("ActionID", "status-1-1")]);
        assert!(response.is_response());
        assert!(response.correlates_to("status-1-1"));
        assert!(!response.correlates_to("status-1-2"));

        let other = msg(&[("Foo", "bar")]);
        assert_eq!(other.kind(), MessageKind::Unknown);
    }

    #[test]
    fn test_field_lookup_is_case_insensitive() {
        let event = msg(&[("Event", "Hangup"), ("CallerIDNum", "8001")]);
        assert_eq!(event.get("calleridnum"), Some("8001"));
        assert_eq!(event.field("Missing"), "");
        assert!(event.is_event_named("hangup"));
    }

    #[test]
    fn test_empty_action_id_is_ignored() {
        let response = msg(&[("Response", "Success"), ("ActionID", "")]);
        assert!(response.action_id().is_none());
    }
}
