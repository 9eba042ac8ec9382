//! Core protocol types.
//!
//! Two audiences read these types: other server processes (through the
//! shared key-value store and the pub/sub channel) and client connections
//! (through the codec). Either way the JSON shape is the contract, so the
//! serde attributes here matter as much as the Rust shape.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Caller-supplied room configuration: a JSON object.
///
/// Room types carry a default set of options; a creation request may
/// override individual top-level keys.
pub type RoomOptions = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A globally unique room identifier.
///
/// Room ids are generated by the process that creates the room and are
/// shared cluster-wide through the directory, so they are strings rather
/// than per-process counters. `#[serde(transparent)]` keeps the JSON form
/// a plain string: `"V1StGXR8_Z5jdHi6B-myT"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The identity of a connected client, recorded as a room's owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps an existing client identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ---------------------------------------------------------------------------
// Directory records
// ---------------------------------------------------------------------------

/// The persisted metadata record for one room.
///
/// Written to the key-value store when a room is created and deleted when
/// it is disposed. Any process in the cluster can read it to learn what
/// kind of room this is and who owns it.
///
/// ```json
/// { "id": "V1StGXR8_Z5jdHi6B-myT", "type": "lobby", "owner": "c-17", "metadata": {} }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// The room's globally unique id.
    pub id: RoomId,

    /// The registered room type this room was created from.
    #[serde(rename = "type")]
    pub room_type: String,

    /// The client that requested the room.
    pub owner: ClientId,

    /// Free-form string metadata. Empty when the room is created.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RoomSnapshot {
    /// Builds the snapshot for a freshly created room.
    pub fn new(id: RoomId, room_type: impl Into<String>, owner: ClientId) -> Self {
        Self {
            id,
            room_type: room_type.into(),
            owner,
            metadata: BTreeMap::new(),
        }
    }
}

/// A change to the room directory, broadcast on the room-events channel so
/// other processes can react without polling the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum DirectoryEvent {
    /// A room was created and persisted.
    RoomCreated {
        room_id: RoomId,
        room_type: String,
        owner: ClientId,
    },

    /// A room was disposed and removed from the directory.
    RoomDisposed { room_id: RoomId },
}

impl DirectoryEvent {
    /// The room this event is about.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::RoomCreated { room_id, .. } | Self::RoomDisposed { room_id } => room_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Client messages
// ---------------------------------------------------------------------------

/// Room-management messages exchanged between a client and a server.
///
/// Internally tagged, so the JSON reads
/// `{ "type": "CreateRoom", "room_type": "lobby", "options": {} }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemMessage {
    // -- Connection lifecycle --
    /// Client → Server: first message on every connection. A client may
    /// claim an identity; otherwise the server assigns one.
    Handshake {
        version: u32,
        #[serde(default)]
        client_id: Option<ClientId>,
    },

    /// Server → Client: handshake accepted.
    HandshakeAck {
        client_id: ClientId,
        server_time: u64,
    },

    /// Either direction: "I'm disconnecting."
    Disconnect { reason: String },

    // -- Heartbeat --
    /// Client → Server keep-alive.
    Heartbeat { client_time: u64 },

    /// Server → Client keep-alive reply.
    HeartbeatAck { client_time: u64, server_time: u64 },

    // -- Room management --
    /// Client → Server: "Create a room of this type for me."
    CreateRoom {
        room_type: String,
        #[serde(default)]
        options: RoomOptions,
    },

    /// Server → Client: the room exists and is registered in the directory.
    RoomCreated { room_id: RoomId, room_type: String },

    /// Client → Server: "Tear down this room." Only the owner may ask.
    DisposeRoom { room_id: RoomId },

    /// Server → Client: the room is gone. Sent as the reply to
    /// `DisposeRoom`, and pushed to the owner when the room is disposed
    /// for any other reason (e.g. server shutdown).
    RoomDisposed { room_id: RoomId },

    /// Client → Server: "Which rooms exist in the cluster?"
    ListRooms {
        #[serde(default)]
        room_type: Option<String>,
    },

    /// Server → Client: directory contents.
    RoomList { rooms: Vec<RoomSnapshot> },

    // -- Errors --
    /// Server → Client: something went wrong. HTTP-style `code`.
    Error { code: u16, message: String },
}

/// The top-level wire wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-side sequence number.
    pub seq: u64,

    /// Milliseconds since the sender's connection started.
    pub timestamp: u64,

    pub payload: SystemMessage,
}

impl Envelope {
    pub fn new(seq: u64, timestamp: u64, payload: SystemMessage) -> Self {
        Self {
            seq,
            timestamp,
            payload,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
