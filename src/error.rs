use std::io;
use thiserror::Error;

/// Unified error type for the simple stream server
#[derive(Error, Debug)]
pub enum SimpleStreamError {
    /// IO error, including handshake deadline expiry
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed handshake request
    #[error("Protocol parse error: {0}")]
    ProtocolParse(String),

    /// Secret mismatch
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Declared request body length above the small buffer capacity
    #[error("Request too long: {0} bytes")]
    RequestTooLong(usize),

    /// Request timestamp outside the anti-replay window
    #[error("Expired request: {0} seconds off server clock")]
    Expired(u64),

    /// Datagram length prefix above the large buffer capacity
    #[error("Packet too long: {0} bytes")]
    PacketTooLong(usize),

    /// Session refused by the gate
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SimpleStreamError>;

impl From<anyhow::Error> for SimpleStreamError {
    fn from(err: anyhow::Error) -> Self {
        SimpleStreamError::Other(err.to_string())
    }
}

impl SimpleStreamError {
    /// Whether this failure is one the peer must not be able to tell apart
    /// from a stalled connection
    pub fn is_probe_sensitive(&self) -> bool {
        matches!(
            self,
            SimpleStreamError::Authentication(_) | SimpleStreamError::Expired(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "early eof");
        let err: SimpleStreamError = io_err.into();
        let display = format!("{}", err);
        assert!(display.contains("IO error"));
        assert!(display.contains("early eof"));
    }

    #[test]
    fn test_authentication_error_display() {
        let err = SimpleStreamError::Authentication("secret mismatch".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Authentication error"));
        assert!(display.contains("secret mismatch"));
    }

    #[test]
    fn test_request_too_long_display() {
        let err = SimpleStreamError::RequestTooLong(4096);
        assert_eq!(format!("{}", err), "Request too long: 4096 bytes");
    }

    #[test]
    fn test_expired_display() {
        let err = SimpleStreamError::Expired(61);
        assert!(format!("{}", err).contains("61 seconds"));
    }

    #[test]
    fn test_packet_too_long_display() {
        let err = SimpleStreamError::PacketTooLong(65506);
        assert_eq!(format!("{}", err), "Packet too long: 65506 bytes");
    }

    #[test]
    fn test_from_anyhow_error() {
        let err: SimpleStreamError = anyhow::anyhow!("some anyhow error").into();
        assert!(format!("{}", err).contains("some anyhow error"));
    }

    #[test]
    fn test_probe_sensitive() {
        assert!(SimpleStreamError::Authentication(String::new()).is_probe_sensitive());
        assert!(SimpleStreamError::Expired(100).is_probe_sensitive());
        assert!(!SimpleStreamError::RequestTooLong(4096).is_probe_sensitive());
        assert!(!SimpleStreamError::PacketTooLong(65506).is_probe_sensitive());
    }

    #[test]
    fn test_result_type_alias_error() {
        fn test_fn() -> Result<i32> {
            Err(SimpleStreamError::Other("failed".to_string()))
        }
        assert!(test_fn().is_err());
    }
}
