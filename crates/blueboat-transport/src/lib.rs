//! Client transport for Blueboat.
//!
//! [`Transport`] accepts client sockets, [`Incoming`] runs the protocol
//! upgrade on one of them, and [`Connection`] moves framed bytes in both
//! directions. The server only ever talks to these
//! traits, so the wire format above them (JSON envelopes) doesn't care how
//! the bytes travel.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{IncomingWebSocket, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;

/// Process-unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A listener for client connections.
pub trait Transport: Send + Sync + 'static {
    type Incoming: Incoming<Connection = Self::Connection, Error = Self::Error>;
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next client socket. The protocol upgrade is left to
    /// [`Incoming::upgrade`], so a slow peer never holds up the listener.
    ///
    /// Returns an error once [`shutdown`](Self::shutdown) has run.
    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error>;

    /// The address the listener is bound to.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;

    /// Stops listening. Connections already accepted are unaffected.
    async fn shutdown(&mut self) -> Result<(), Self::Error>;
}

/// A client socket that has been accepted but not yet upgraded.
pub trait Incoming: Send + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Runs the protocol handshake, bounded by a timeout.
    async fn upgrade(self) -> Result<Self::Connection, Self::Error>;

    fn peer_addr(&self) -> SocketAddr;
}

/// One client connection.
///
/// Sending and receiving are independent: a task may be parked in
/// [`recv`](Self::recv) while another sends on the same connection.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message from the peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;

    fn peer_addr(&self) -> SocketAddr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_ids_order_by_value() {
        let mut ids = vec![ConnectionId::new(3), ConnectionId::new(1), ConnectionId::new(2)];
        ids.sort();
        assert_eq!(
            ids.into_iter().map(ConnectionId::into_inner).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
