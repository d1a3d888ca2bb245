use thiserror::Error;

use crate::database::DatabaseError;

/// Error types for the AMI integration layer
///
/// The correlation variants (`CorrelationTimeout`, `ProtocolFailure`,
/// `TransportFatal`) display only their message, since that text is what a
/// synchronous caller hands back to the user.
///
/// # Examples
///
/// ```
/// use callcenter_engine::CallCenterError;
///
/// let error = CallCenterError::timeout("timeout waiting for hangup call");
/// assert_eq!(error.to_string(), "timeout waiting for hangup call");
/// ```
#[derive(Error, Debug)]
pub enum CallCenterError {
    /// Dial or login to the PBX failed
    ///
    /// Fatal to the attempted operation, never retried here.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No matching response or event arrived before the deadline
    #[error("{0}")]
    CorrelationTimeout(String),

    /// The PBX explicitly refused the action, e.g. "No such channel"
    #[error("{0}")]
    ProtocolFailure(String),

    /// The transport failed after login
    ///
    /// Ends the tracker loop or the in-flight synchronous wait.
    #[error("{0}")]
    TransportFatal(String),

    /// Persistence gateway failure
    #[error("Database error: {0}")]
    Persistence(#[from] DatabaseError),

    /// Configuration validation and parsing errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller supplied input that cannot be turned into an action
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A message that should have been an event lacked required fields
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Unexpected internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for CallCenterError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for CallCenterError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<ami_transport::Error> for CallCenterError {
    fn from(err: ami_transport::Error) -> Self {
        if err.is_connection_error() {
            Self::Connection(err.to_string())
        } else {
            Self::TransportFatal(err.to_string())
        }
    }
}

impl CallCenterError {
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::CorrelationTimeout(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolFailure(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::TransportFatal(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error ends a consuming loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::TransportFatal(_))
    }
}

/// Result type for call center operations
pub type Result<T> = std::result::Result<T, CallCenterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_errors_display_bare_message() {
        assert_eq!(
            CallCenterError::protocol("no open channel on extension 8001").to_string(),
            "no open channel on extension 8001"
        );
        assert_eq!(
            CallCenterError::transport("an error occurred executing the command").to_string(),
            "an error occurred executing the command"
        );
    }

    #[test]
    fn test_transport_errors_split_by_phase() {
        let login = CallCenterError::from(ami_transport::Error::Login("bad secret".into()));
        assert!(matches!(login, CallCenterError::Connection(_)));
        assert!(login.is_fatal());

        let closed = CallCenterError::from(ami_transport::Error::Closed);
        assert!(matches!(closed, CallCenterError::TransportFatal(_)));
    }

    #[test]
    fn test_database_errors_convert() {
        let err: CallCenterError = DatabaseError::NotFound("call 1.1".into()).into();
        assert!(matches!(err, CallCenterError::Persistence(_)));
        assert!(!err.is_fatal());
    }
}
