//! Transport tests against a scripted in-process manager endpoint


use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

/// One accepted connection on the fake PBX side
pub(crate) struct PbxSession {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl PbxSession {
    /// Read one action block and return its fields
    pub async fn read_action(&mut self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await.unwrap();
            if n == 0 {
                return fields;
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                if fields.is_empty() {
                    continue;
                }
                return fields;
            }
            if let Some((k, v)) = trimmed.split_once(": ") {
                fields.push((k.to_string(), v.to_string()));
            }
        }
    }

    pub async fn write_raw(&mut self, raw: &str) {
        self.write_bytes(raw.as_bytes()).await;
    }

    pub async fn write_bytes(&mut self, raw: &[u8]) {
        self.writer.write_all(raw).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn write_message(&mut self, pairs: &[(&str, &str)]) {
        let mut raw = String::new();
        for (k, v) in pairs {
            raw.push_str(&format!("{}: {}\r\n", k, v));
        }
        raw.push_str("\r\n");
        self.write_raw(&raw).await;
    }

    /// Banner plus a login reply for whatever id the client used
    pub async fn accept_login(&mut self, success: bool) -> Vec<(String, String)> {
        self.write_raw("Asterisk Call Manager/5.0.1\r\n").await;
        let login = self.read_action().await;
        let action_id = field(&login, "ActionID").to_string();
        if success {
            self.write_message(&[
                ("Response", "Success"),
                ("ActionID", &action_id),
                ("Message", "Authentication accepted"),
            ])
            .await;
        } else {
            self.write_message(&[
                ("Response", "Error"),
                ("ActionID", &action_id),
                ("Message", "Authentication failed"),
            ])
            .await;
        }
        login
    }
}

pub(crate) fn field<'a>(fields: &'a [(String, String)], key: &str) -> &'a str {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Bind a listener on an ephemeral local port
pub(crate) async fn fake_pbx() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

pub(crate) async fn accept(listener: &TcpListener) -> PbxSession {
    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, writer) = stream.into_split();
    PbxSession {
        reader: BufReader::new(read_half),
        writer,
    }
}
