//! Directory configuration and the room state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DirectoryConfig
// ---------------------------------------------------------------------------

/// Where and how the room directory is stored.
///
/// Every process in a cluster must use the same keys and channel, or they
/// won't see each other's rooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Key holding the JSON array of live room ids.
    pub index_key: String,

    /// Prefix for per-room snapshot keys (`<room_prefix><room id>`).
    pub room_prefix: String,

    /// Pub/sub channel that carries directory events.
    pub events_channel: String,

    /// Upper bound for any single store or pub/sub call.
    pub op_timeout: Duration,

    /// How many times an index update is retried when another writer
    /// changed the index between our read and our write.
    pub max_cas_retries: u32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            index_key: "blueboat:rooms".to_string(),
            room_prefix: "blueboat:room:".to_string(),
            events_channel: "blueboat:room-events".to_string(),
            op_timeout: Duration::from_secs(5),
            max_cas_retries: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Active → Disposing → Disposed
/// ```
///
/// A room only ever moves forward. `dispose()` claims the
/// `Active → Disposing` edge; whoever loses that race sees a non-active
/// state and returns without doing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Active,
    Disposing,
    Disposed,
}

impl RoomState {
    /// Returns `true` while the room is live and owned.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns the next state, or `None` from the terminal state.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Active => Some(Self::Disposing),
            Self::Disposing => Some(Self::Disposed),
            Self::Disposed => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Disposing => write!(f, "Disposing"),
            Self::Disposed => write!(f, "Disposed"),
        }
    }
}
