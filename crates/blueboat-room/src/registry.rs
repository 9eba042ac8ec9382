//! Room types: the `RoomHandler` trait and the registry that maps type
//! names to handlers.
//!
//! Applications register every room type they host once, at startup.
//! Rooms are then created by name, so a client can ask for a `"lobby"`
//! without knowing anything about the Rust type behind it.

use std::sync::Arc;

use async_trait::async_trait;
use blueboat_protocol::RoomOptions;

use crate::Room;

/// The extension point for room types.
///
/// Everything a room does while it is alive (game rules, state sync) is
/// the handler's business and happens outside the lifecycle core. The core
/// only calls these two hooks.
///
/// ```rust
/// use async_trait::async_trait;
/// use blueboat_room::{Room, RoomHandler};
///
/// struct Lobby;
///
/// #[async_trait]
/// impl RoomHandler for Lobby {
///     async fn on_create(&self, room: &Room) -> Result<(), String> {
///         room.set_metadata("mode", "casual").await.map_err(|e| e.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait RoomHandler: Send + Sync + 'static {
    /// Called after the room is registered in the directory, before it is
    /// handed to the caller. Returning `Err` aborts the creation and the
    /// directory entry is rolled back.
    async fn on_create(&self, _room: &Room) -> Result<(), String> {
        Ok(())
    }

    /// Called once when the room is disposed, before it leaves the
    /// directory. Release timers, subscriptions, and the like here.
    async fn on_dispose(&self, _room: &Room) -> Result<(), String> {
        Ok(())
    }
}

/// A registered room type.
#[derive(Clone)]
pub struct RoomTypeDescriptor {
    name: String,
    handler: Arc<dyn RoomHandler>,
    default_options: RoomOptions,
}

impl RoomTypeDescriptor {
    /// The type's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handler every room of this type shares.
    pub fn handler(&self) -> &Arc<dyn RoomHandler> {
        &self.handler
    }

    /// Options applied to every room of this type unless overridden.
    pub fn default_options(&self) -> &RoomOptions {
        &self.default_options
    }
}

impl std::fmt::Debug for RoomTypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomTypeDescriptor")
            .field("name", &self.name)
            .field("default_options", &self.default_options)
            .finish_non_exhaustive()
    }
}

/// Process-local room types, in registration order.
///
/// Append-only: there is no way to unregister a type. Registering a name
/// twice keeps the first registration and ignores the rest, so startup
/// code can run more than once without failing.
#[derive(Debug, Clone, Default)]
pub struct RoomTypeRegistry {
    types: Vec<RoomTypeDescriptor>,
}

impl RoomTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a room type.
    ///
    /// Returns `true` if the type was added, `false` if a type with this
    /// name already existed (the existing one is kept).
    pub fn register<H: RoomHandler>(
        &mut self,
        name: impl Into<String>,
        handler: H,
        default_options: RoomOptions,
    ) -> bool {
        let name = name.into();
        if self.contains(&name) {
            tracing::debug!(room_type = %name, "room type already registered, ignoring");
            return false;
        }
        tracing::info!(room_type = %name, "room type registered");
        self.types.push(RoomTypeDescriptor {
            name,
            handler: Arc::new(handler),
            default_options,
        });
        true
    }

    /// Looks up a room type by name.
    pub fn get(&self, name: &str) -> Option<&RoomTypeDescriptor> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Returns `true` if a type with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered type names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Shallow-merges room options: `defaults` first, then every top-level key
/// in `overrides` replaces the matching default. Nested objects are
/// replaced whole, not merged.
pub fn merge_options(defaults: &RoomOptions, overrides: RoomOptions) -> RoomOptions {
    let mut merged = defaults.clone();
    merged.extend(overrides);
    merged
}
