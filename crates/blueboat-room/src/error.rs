//! Error types for the room layer.

use std::time::Duration;

use blueboat_protocol::RoomId;
use blueboat_store::StoreError;

/// Errors from reading or writing the shared room directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record couldn't be serialized for storage.
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A stored record exists but can't be parsed.
    #[error("corrupt directory entry at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A store call didn't complete within the configured bound.
    #[error("directory operation `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// Other writers kept changing a shared key; the compare-and-set loop
    /// gave up.
    #[error("gave up updating {key} after {attempts} conflicting writes")]
    Contention { key: String, attempts: u32 },
}

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No room type with this name is registered. Terminal for the
    /// request; retrying won't help.
    #[error("no room type registered as {0:?}")]
    RoomTypeNotFound(String),

    /// The directory couldn't be read or written.
    #[error("room directory failure: {0}")]
    Directory(#[from] DirectoryError),

    /// The room type's handler rejected the room.
    #[error("room handler failed: {0}")]
    Handler(String),

    /// Tearing the room down failed part-way. The room is still
    /// considered disposed.
    #[error("disposing room {room_id} failed: {reason}")]
    DisposalFailed { room_id: RoomId, reason: String },

    /// The room isn't owned by this process (or no longer exists).
    #[error("room {0} not found")]
    NotFound(RoomId),
}
