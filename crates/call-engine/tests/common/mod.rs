//! Shared helpers: a scripted manager endpoint and event builders

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use ami_transport::{AmiMessage, ConnectOptions, Credentials};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

use callcenter_engine::config::ActionConfig;

/// In-process stand-in for the PBX manager port
pub struct FakePbx {
    listener: TcpListener,
    address: SocketAddr,
}

impl FakePbx {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        Self { listener, address }
    }

    pub fn address(&self) -> String {
        self.address.to_string()
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::new(self.address(), Credentials::new("admin", "amp111"))
            .with_connect_timeout(Duration::from_secs(2))
    }

    /// Accept a connection and complete the login exchange
    pub async fn accept_logged_in(&self) -> PbxSession {
        let (stream, _) = self.listener.accept().await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut session = PbxSession {
            reader: BufReader::new(reader),
            writer,
            login: None,
        };
        session.send_raw("Asterisk Call Manager/5.0.1\r\n").await;
        let login = session.read_action().await;
        assert_eq!(login.get("Action"), Some("Login"));
        session
            .send(&[
                ("Response", "Success"),
                ("ActionID", login.action_id().unwrap_or_default()),
                ("Message", "Authentication accepted"),
            ])
            .await;
        session.login = Some(login);
        session
    }
}

/// Server side of one manager session
pub struct PbxSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub login: Option<AmiMessage>,
}

impl PbxSession {
    /// Next action block sent by the client
    pub async fn read_action(&mut self) -> AmiMessage {
        let mut fields = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end();
            if line.is_empty() {
                if fields.is_empty() {
                    continue;
                }
                break;
            }
            if let Some((key, value)) = line.split_once(": ") {
                fields.push((key.to_string(), value.to_string()));
            }
        }
        AmiMessage::from_fields(fields)
    }

    pub async fn send_raw(&mut self, raw: &str) {
        self.send_bytes(raw.as_bytes()).await;
    }

    pub async fn send_bytes(&mut self, raw: &[u8]) {
        self.writer.write_all(raw).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send(&mut self, fields: &[(&str, &str)]) {
        let mut raw = String::new();
        for (key, value) in fields {
            raw.push_str(key);
            raw.push_str(": ");
            raw.push_str(value);
            raw.push_str("\r\n");
        }
        raw.push_str("\r\n");
        self.send_raw(&raw).await;
    }

    pub async fn send_message(&mut self, message: &AmiMessage) {
        let fields: Vec<(&str, &str)> = message
            .fields()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.send(&fields).await;
    }

    /// Close the connection from the PBX side
    pub async fn hang_up(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Log to the test output; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_test_writer()
        .try_init();
}

/// Correlator deadlines short enough for tests
pub fn quick_actions() -> ActionConfig {
    ActionConfig {
        hangup_timeout_ms: 300,
        status_timeout_ms: 300,
        queue_timeout_ms: 300,
        ..Default::default()
    }
}

pub fn message(fields: &[(&str, &str)]) -> AmiMessage {
    AmiMessage::from_fields(
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

pub fn newchannel(linked_id: &str, unique_id: &str, caller: &str) -> AmiMessage {
    message(&[
        ("Event", "Newchannel"),
        ("Channel", format!("SIP/{}-00000001", caller).as_str()),
        ("CallerIDNum", caller),
        ("Context", "from-internal"),
        ("Exten", "3001"),
        ("Uniqueid", unique_id),
        ("Linkedid", linked_id),
    ])
}

pub fn bridge_enter(linked_id: &str, unique_id: &str, caller: &str) -> AmiMessage {
    message(&[
        ("Event", "BridgeEnter"),
        ("Channel", format!("SIP/{}-00000002", caller).as_str()),
        ("CallerIDNum", caller),
        ("ConnectedLineNum", "3001"),
        ("Context", "from-internal"),
        ("Uniqueid", unique_id),
        ("Linkedid", linked_id),
    ])
}

pub fn bridge_leave(linked_id: &str, unique_id: &str, caller: &str) -> AmiMessage {
    message(&[
        ("Event", "BridgeLeave"),
        ("CallerIDNum", caller),
        ("Context", "from-internal"),
        ("Uniqueid", unique_id),
        ("Linkedid", linked_id),
    ])
}

pub fn hangup(linked_id: &str, unique_id: &str, caller: &str, context: &str) -> AmiMessage {
    message(&[
        ("Event", "Hangup"),
        ("Channel", format!("SIP/{}-00000001", caller).as_str()),
        ("CallerIDNum", caller),
        ("Context", context),
        ("Cause", "16"),
        ("Uniqueid", unique_id),
        ("Linkedid", linked_id),
    ])
}
