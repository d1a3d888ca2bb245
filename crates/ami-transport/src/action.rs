//! Outbound manager actions

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Identifier attached to an action so its response can be found again
///
/// Format is `<purpose>-<unix-timestamp>-<sequence>`. The sequence is a
/// process-wide counter, so two actions issued within the same second never
/// share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId(String);

impl ActionId {
    /// Generate a fresh id for the given purpose (`hangupcall`, `extstatus`...)
    pub fn generate(purpose: &str) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        ActionId(format!("{}-{}-{}", purpose, timestamp, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(value: &str) -> Self {
        ActionId(value.to_string())
    }
}

/// A named manager command with its fields
#[derive(Debug, Clone)]
pub struct Action {
    name: String,
    action_id: ActionId,
    fields: Vec<(String, String)>,
}

impl Action {
    /// Create an action with a generated id derived from its lowercased name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let action_id = ActionId::generate(&name.to_ascii_lowercase());
        Self {
            name,
            action_id,
            fields: Vec::new(),
        }
    }

    /// Replace the generated id with one for a specific purpose
    pub fn with_purpose(mut self, purpose: &str) -> Self {
        self.action_id = ActionId::generate(purpose);
        self
    }

    /// Use an explicit id
    pub fn with_action_id(mut self, action_id: ActionId) -> Self {
        self.action_id = action_id;
        self
    }

    /// Append a field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action_id(&self) -> &ActionId {
        &self.action_id
    }

    /// Value of a field set on this action
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Wire form: `Action`, `ActionID`, the fields, then a blank line
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.fields.len() * 32);
        put_line(&mut buf, "Action", &self.name);
        put_line(&mut buf, "ActionID", self.action_id.as_str());
        for (key, value) in &self.fields {
            put_line(&mut buf, key, value);
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }
}

fn put_line(buf: &mut BytesMut, key: &str, value: &str) {
    buf.put_slice(key.as_bytes());
    buf.put_slice(b": ");
    // a stray newline in a value would split the message on the wire
    for byte in value.bytes().filter(|b| *b != b'\r' && *b != b'\n') {
        buf.put_u8(byte);
    }
    buf.put_slice(b"\r\n");
}
