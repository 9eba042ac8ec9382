//! Server configuration.

use std::time::Duration;

use blueboat_room::DirectoryConfig;
use serde::{Deserialize, Serialize};

/// Settings for a [`RoomServer`](crate::RoomServer).
///
/// Every field has a default, so only the ones that matter need setting:
///
/// ```rust
/// use std::time::Duration;
/// use blueboat::ServerConfig;
///
/// let config = ServerConfig {
///     bind_addr: "0.0.0.0:9000".into(),
///     dispose_timeout: Duration::from_secs(3),
///     ..ServerConfig::default()
/// };
/// assert!(!config.dispose_on_disconnect);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// Keys, channel and timeouts for the shared room directory.
    pub directory: DirectoryConfig,

    /// Upper bound on a single room's disposal during shutdown. A room
    /// that takes longer is reported as failed and forgotten.
    pub dispose_timeout: Duration,

    /// How long a new connection has to send its `Handshake`.
    pub handshake_timeout: Duration,

    /// A connection that sends nothing (not even heartbeats) for this long
    /// is dropped.
    pub idle_timeout: Duration,

    /// How long shutdown waits for connection tasks to say goodbye after
    /// the rooms are gone.
    pub drain_timeout: Duration,

    /// Dispose a client's rooms when its connection ends. Off by default:
    /// rooms live until they are disposed explicitly or the server stops.
    pub dispose_on_disconnect: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            directory: DirectoryConfig::default(),
            dispose_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(2),
            dispose_on_disconnect: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.dispose_timeout, Duration::from_secs(10));
        assert_eq!(config.directory.index_key, DirectoryConfig::default().index_key);
    }
}
