//! Asterisk Manager Interface transport for the call center stack
//!
//! This crate owns the TCP connection to the PBX manager port, performs the
//! login exchange and turns the line-based `Key: Value` stream into typed
//! [`AmiMessage`]s. Consumers get two channels from a connected
//! [`AmiClient`]: one carrying every received message and one that fires once
//! when the connection dies.

pub mod action;
pub mod client;
pub mod codec;
pub mod error;
pub mod message;

// Internal modules
#[cfg(test)]
mod tests;

// Re-export commonly used types and functions
pub use action::{Action, ActionId};
pub use client::{AmiClient, ConnectOptions, Credentials};
pub use error::{Error, Result};
pub use message::{AmiMessage, MessageKind};

/// Connect to a manager endpoint and log in with default options
pub async fn connect(address: &str, credentials: Credentials) -> Result<AmiClient> {
    AmiClient::connect(&ConnectOptions::new(address, credentials)).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        connect, Action, ActionId, AmiClient, AmiMessage, ConnectOptions, Credentials, Error,
        MessageKind, Result,
    };
}
