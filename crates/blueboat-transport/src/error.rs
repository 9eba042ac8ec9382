use std::io;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener couldn't be bound.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Accepting a TCP connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    /// A peer connected but never completed the WebSocket upgrade.
    #[error("websocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    /// The transport was shut down and accepts nothing more.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Whether the accept loop can't continue after this error.
    ///
    /// A single misbehaving peer (reset mid-accept, failed upgrade) is not
    /// fatal. A listener that has been closed, or one failing with an
    /// unexpected OS error, is.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::AcceptFailed(e) => !matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
            ),
            Self::BindFailed { .. } | Self::Shutdown => true,
            Self::HandshakeFailed(_)
            | Self::ConnectionClosed(_)
            | Self::SendFailed(_)
            | Self::ReceiveFailed(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_errors_are_not_fatal() {
        let reset = TransportError::AcceptFailed(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!reset.is_fatal());
        assert!(!TransportError::HandshakeFailed("bad upgrade".into()).is_fatal());
    }

    #[test]
    fn test_listener_errors_are_fatal() {
        let other = TransportError::AcceptFailed(io::Error::other("listener gone"));
        assert!(other.is_fatal());
        assert!(TransportError::Shutdown.is_fatal());
    }
}
