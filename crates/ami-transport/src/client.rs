//! Manager client: dial, login and the background receive loop

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::action::Action;
use crate::codec::{self, MessageAssembler};
use crate::error::{Error, Result};
use crate::message::AmiMessage;

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Manager login credentials
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Everything needed to open a manager session
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `host:port` of the manager interface
    pub address: String,
    pub credentials: Credentials,
    /// Bound on dial plus login
    pub connect_timeout: Duration,
    /// Messages buffered between the socket reader and the consumer
    pub channel_capacity: usize,
    /// Ask the PBX to stream events on this session
    pub events: bool,
}

impl ConnectOptions {
    pub fn new(address: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            address: address.into(),
            credentials,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            events: true,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_events(mut self, events: bool) -> Self {
        self.events = events;
        self
    }
}

/// A logged-in manager session
///
/// Received messages arrive on a bounded channel; when the consumer stops
/// draining it the socket reader stops reading. Any unrecoverable fault is
/// delivered exactly once on the fault channel, after which the message
/// channel closes.
pub struct AmiClient {
    address: String,
    writer: OwnedWriteHalf,
    messages: mpsc::Receiver<AmiMessage>,
    faults: mpsc::Receiver<Error>,
    reader_task: JoinHandle<()>,
    closed: bool,
}

impl AmiClient {
    /// Dial the PBX and log in
    ///
    /// Dial and login failures are returned as-is; there is no retry.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let address = options.address.clone();

        let stream = timeout(options.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {}", address)))?
            .map_err(|source| {
                error!("Error connecting to Asterisk at {}: {}", address, source);
                Error::Connect {
                    address: address.clone(),
                    source,
                }
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY on {}: {}", address, e);
        }

        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut assembler = MessageAssembler::new();

        timeout(
            options.connect_timeout,
            login(&mut reader, &mut writer, &mut assembler, options),
        )
        .await
        .map_err(|_| Error::Timeout("waiting for login response".to_string()))?
        .map_err(|e| {
            error!("Error logging into AMI at {}: {}", address, e);
            e
        })?;

        info!("Logged into AMI at {}", address);

        let (messages_tx, messages) = mpsc::channel(options.channel_capacity.max(1));
        let (faults_tx, faults) = mpsc::channel(1);
        let reader_task = tokio::spawn(receive_loop(
            reader,
            assembler,
            messages_tx,
            faults_tx,
            address.clone(),
        ));

        Ok(Self {
            address,
            writer,
            messages,
            faults,
            reader_task,
            closed: false,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Write an action to the socket
    pub async fn send(&mut self, action: &Action) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        debug!(
            "Sending AMI action {} ({}) to {}",
            action.name(),
            action.action_id(),
            self.address
        );
        self.writer.write_all(&action.to_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next received message, `None` once the reader has stopped
    pub async fn recv(&mut self) -> Option<AmiMessage> {
        self.messages.recv().await
    }

    /// Resolves with the fatal transport error, `None` after a local close
    pub async fn fault(&mut self) -> Option<Error> {
        self.faults.recv().await
    }

    /// Next message, or the fatal error that ended the session
    ///
    /// Messages received before a fault are always delivered first. Safe to
    /// use inside `tokio::select!`.
    pub async fn next_message(&mut self) -> Result<AmiMessage> {
        tokio::select! {
            biased;
            Some(message) = self.messages.recv() => Ok(message),
            Some(fault) = self.faults.recv() => Err(fault),
            else => Err(Error::Closed),
        }
    }

    /// Direct access to the message channel
    pub fn messages(&mut self) -> &mut mpsc::Receiver<AmiMessage> {
        &mut self.messages
    }

    /// Direct access to the fault channel
    pub fn faults(&mut self) -> &mut mpsc::Receiver<Error> {
        &mut self.faults
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Log off and release the socket
    pub async fn close(mut self) -> Result<()> {
        self.shutdown().await
    }

    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let logoff = Action::new("Logoff");
        if let Err(e) = self.writer.write_all(&logoff.to_bytes()).await {
            trace!("Logoff to {} not delivered: {}", self.address, e);
        }
        let result = self.writer.shutdown().await;
        self.reader_task.abort();
        debug!("AMI connection to {} closed", self.address);
        result.map_err(Error::from)
    }
}

impl Drop for AmiClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl fmt::Debug for AmiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AmiClient({})", self.address)
    }
}

async fn login(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    assembler: &mut MessageAssembler,
    options: &ConnectOptions,
) -> Result<()> {
    // greeting banner, e.g. "Asterisk Call Manager/5.0.1"
    let mut banner = String::new();
    match codec::read_line(reader, &mut banner).await? {
        Some(()) => {
            let line = banner.trim_end();
            if line.contains(": ") {
                // no banner, the peer went straight to a message
                assembler.push_line(&banner);
            } else {
                debug!("AMI banner: {}", line);
            }
        }
        None => return Err(Error::Login("connection closed before banner".to_string())),
    }

    let action = Action::new("Login")
        .with_purpose("login")
        .field("Username", options.credentials.username.as_str())
        .field("Secret", options.credentials.secret.as_str())
        .field("Events", if options.events { "on" } else { "off" });
    writer.write_all(&action.to_bytes()).await?;
    writer.flush().await?;

    loop {
        let message = codec::read_message(reader, assembler)
            .await?
            .ok_or_else(|| Error::Login("connection closed during login".to_string()))?;

        if !message.correlates_to(action.action_id().as_str()) {
            trace!("Skipping message received before login response: {}", message);
            continue;
        }

        return if message.response().eq_ignore_ascii_case("Success") {
            Ok(())
        } else {
            let reason = match message.get("Message") {
                Some(text) if !text.is_empty() => text.to_string(),
                _ => format!("unexpected login response '{}'", message.response()),
            };
            Err(Error::Login(reason))
        };
    }
}

// Runs until the socket fails, the peer closes, or the consumer goes away
async fn receive_loop(
    mut reader: BufReader<OwnedReadHalf>,
    mut assembler: MessageAssembler,
    messages_tx: mpsc::Sender<AmiMessage>,
    faults_tx: mpsc::Sender<Error>,
    address: String,
) {
    loop {
        match codec::read_message(&mut reader, &mut assembler).await {
            Ok(Some(message)) => {
                if messages_tx.send(message).await.is_err() {
                    debug!("AMI consumer for {} went away, stopping reader", address);
                    break;
                }
            }
            Ok(None) => {
                warn!("AMI connection to {} closed by peer", address);
                let _ = faults_tx.try_send(Error::Closed);
                break;
            }
            Err(e) => {
                error!("Error on AMI connection to {}: {}", address, e);
                let _ = faults_tx.try_send(e);
                break;
            }
        }
    }
    info!("AMI receive loop for {} terminated", address);
}
