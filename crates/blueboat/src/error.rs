//! Unified error type for the Blueboat server.

use blueboat_protocol::{ProtocolError, RoomId};
use blueboat_room::{DirectoryError, RoomError};
use blueboat_transport::TransportError;

/// Top-level error wrapping every crate-specific error.
///
/// `#[from]` on each wrapper lets `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener or connection failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode or invalid message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Room creation or disposal failed.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Direct directory access (room listings) failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// A client asked to dispose a room it doesn't own.
    #[error("room {room_id} is owned by another client")]
    NotOwner { room_id: RoomId },

    /// The server has begun shutting down and takes no new rooms.
    #[error("server is shutting down")]
    ShuttingDown,

    /// The accept loop died; the server drained its rooms and stopped.
    #[error("fatal server error: {0}")]
    Fatal(String),
}

impl ServerError {
    /// The status code reported to clients in `SystemMessage::Error`.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(_) => 400,
            Self::Room(RoomError::Handler(_)) => 400,
            Self::NotOwner { .. } => 403,
            Self::Room(RoomError::RoomTypeNotFound(_) | RoomError::NotFound(_)) => 404,
            Self::ShuttingDown => 503,
            Self::Room(RoomError::Directory(_) | RoomError::DisposalFailed { .. })
            | Self::Directory(_)
            | Self::Transport(_)
            | Self::Fatal(_) => 500,
        }
    }
}
