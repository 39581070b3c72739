//! Transport Error Types
//!
//! Error handling for framed connections and request correlation.

use codec::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network connectivity errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Connection management errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
    },

    /// Framing errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Message encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// No reply arrived before the caller's deadline
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The pending request was removed before it was answered
    #[error("Request {sync_key} expired before it was answered")]
    Expired { sync_key: i32 },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error with source
    pub fn network_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Protocol corruption or programming defect; the connection should not continue
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Codec(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Failures caused by the peer going away rather than by bad data
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Io { source, .. }
            | TransportError::Network {
                source: Some(source),
                ..
            } => matches!(
                source.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            TransportError::Connection { .. } => true,
            _ => false,
        }
    }

    /// Get error category for logs
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "network",
            TransportError::Connection { .. } => "connection",
            TransportError::Protocol { .. } => "protocol",
            TransportError::Codec(e) => e.category(),
            TransportError::Timeout { .. } => "timeout",
            TransportError::Expired { .. } => "expired",
            TransportError::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_conversion_and_category() {
        let err: TransportError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(err.category(), "io");
        assert!(err.is_disconnect());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_codec_errors_keep_their_classification() {
        let err: TransportError = CodecError::UnknownTag {
            tag: codec::MessageTag::new(*b"Bogus!"),
        }
        .into();
        assert!(err.is_fatal());
        assert_eq!(err.category(), "unknown_tag");
        assert_eq!(err.to_string(), "Codec error: Unknown message tag Bogus!");
    }

    #[test]
    fn test_refused_connect_is_a_network_error() {
        let source = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::network_with_source("Failed to connect", source);
        assert_eq!(err.category(), "network");
        assert!(!err.is_disconnect());
        assert_eq!(err.to_string(), "Network error: Failed to connect");
    }

    #[test]
    fn test_timeout_message() {
        let err = TransportError::timeout("reply to request 4", 250);
        assert_eq!(
            err.to_string(),
            "Timeout error: reply to request 4 exceeded 250ms"
        );
        assert!(!err.is_disconnect());
    }
}
