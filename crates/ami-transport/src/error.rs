use std::io;

use thiserror::Error;

/// Result type for manager transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the manager transport
#[derive(Error, Debug)]
pub enum Error {
    /// TCP dial to the PBX failed
    #[error("error connecting to asterisk at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The PBX rejected the credentials or answered the login unexpectedly
    #[error("error logging into ami: {0}")]
    Login(String),

    /// Socket error after the session was established
    #[error("ami socket error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent something that is not a manager message
    #[error("ami protocol violation: {0}")]
    Protocol(String),

    /// The connection was closed by the peer or locally
    #[error("ami connection closed")]
    Closed,

    /// Dial or login did not complete in time
    #[error("timed out {0}")]
    Timeout(String),
}

impl Error {
    /// Whether the error happened before the session was usable
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::Login(_) | Error::Timeout(_))
    }
}
