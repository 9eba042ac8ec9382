//! Room lifecycle and directory for Blueboat.
//!
//! A room is created from a registered room type, persisted in a
//! cluster-wide directory, and disposed exactly once.
//!
//! ```text
//! RoomTypeRegistry ──lookup──→ RoomFactory ──persist──→ RoomDirectory
//!                                  │                        │
//!                                  ▼                        ▼
//!                                Room ──dispose──→ unregister + RoomDisposed event
//! ```
//!
//! # Key types
//!
//! - [`RoomHandler`]: the trait applications implement per room type
//! - [`RoomTypeRegistry`]: process-local map of room-type name → handler
//! - [`RoomDirectory`]: the shared room index and snapshots
//! - [`RoomFactory`]: validates, allocates, constructs, persists
//! - [`Room`]: one live room owned by this process

mod config;
mod directory;
mod error;
mod factory;
mod registry;
mod room;

pub use config::{DirectoryConfig, RoomState};
pub use directory::{DirectoryEvents, RoomDirectory};
pub use error::{DirectoryError, RoomError};
pub use factory::{ROOM_ID_LEN, RoomFactory, RoomRequest, generate_room_id};
pub use registry::{RoomHandler, RoomTypeDescriptor, RoomTypeRegistry, merge_options};
pub use room::{DisposeHook, OwnerSender, Room};
