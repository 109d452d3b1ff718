//! Error types for dhcpfront

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Malformed kernel data (capture records, routing messages)
    #[error("Parse error: {0}")]
    ParseError(String),
    /// Malformed message from a sibling process
    #[error("Protocol violation: {0}")]
    Protocol(String),
    /// IPC peer went away
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl FrontendError {
    /// Whether this error breaks a process-tree invariant and must
    /// terminate the frontend.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FrontendError::Io(_)
                | FrontendError::Protocol(_)
                | FrontendError::ChannelClosed(_)
                | FrontendError::ConfigError(_)
        )
    }
}

impl From<nix::Error> for FrontendError {
    fn from(error: nix::Error) -> Self {
        FrontendError::Io(io::Error::from(error))
    }
}

impl From<bincode::Error> for FrontendError {
    fn from(error: bincode::Error) -> Self {
        FrontendError::Protocol(error.to_string())
    }
}

pub type FrontendResult<T> = Result<T, FrontendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert!(FrontendError::Protocol("short".into()).is_fatal());
        assert!(FrontendError::ChannelClosed("engine").is_fatal());
        assert!(!FrontendError::ParseError("partial rtm".into()).is_fatal());
        assert!(!FrontendError::InvalidParameter("hostname".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = FrontendError::Protocol("IMSG_BPFSOCK wrong length: 2".into());
        assert_eq!(err.to_string(), "Protocol violation: IMSG_BPFSOCK wrong length: 2");
    }
}
