use thiserror::Error;

/// Result alias for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while bootstrapping shared infrastructure
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem problem, e.g. the log directory cannot be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A global subscriber was already installed
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}
