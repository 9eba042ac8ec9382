//! Room factory: turns a creation request into a live, registered room.

use std::sync::Arc;

use blueboat_protocol::{ClientId, DirectoryEvent, RoomId, RoomOptions, RoomSnapshot};
use rand::Rng;

use crate::room::RoomParts;
use crate::{
    DirectoryError, DisposeHook, OwnerSender, Room, RoomDirectory, RoomError, RoomTypeRegistry,
    merge_options,
};

/// Length of generated room ids.
pub const ROOM_ID_LEN: usize = 21;

/// URL-safe alphabet for room ids (64 symbols, so 6 bits per character).
const ROOM_ID_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Generates a fresh room id: 21 random characters from a 64-symbol
/// URL-safe alphabet, about 126 bits of entropy.
pub fn generate_room_id() -> RoomId {
    let mut rng = rand::rng();
    let id: String = (0..ROOM_ID_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.random_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect();
    RoomId::new(id)
}

/// A request to create one room.
#[derive(Debug, Clone)]
pub struct RoomRequest {
    pub room_type: String,
    pub options: RoomOptions,
    pub owner: ClientId,
    pub owner_tx: Option<OwnerSender>,
}

impl RoomRequest {
    pub fn new(room_type: impl Into<String>, options: RoomOptions, owner: ClientId) -> Self {
        Self {
            room_type: room_type.into(),
            options,
            owner,
            owner_tx: None,
        }
    }

    /// Attaches the owner's connection so the room can notify it.
    pub fn with_owner_channel(mut self, owner_tx: OwnerSender) -> Self {
        self.owner_tx = Some(owner_tx);
        self
    }
}

/// Validates, allocates, constructs, and persists rooms.
///
/// Creation is all-or-nothing: if the directory writes or the handler's
/// `on_create` fail, whatever was written is removed again and no room is
/// returned.
pub struct RoomFactory {
    registry: Arc<RoomTypeRegistry>,
    directory: RoomDirectory,
    on_disposed: Option<DisposeHook>,
}

impl RoomFactory {
    pub fn new(registry: Arc<RoomTypeRegistry>, directory: RoomDirectory) -> Self {
        Self {
            registry,
            directory,
            on_disposed: None,
        }
    }

    /// Installs the hook every room created by this factory calls when it
    /// finishes disposing.
    pub fn on_disposed(mut self, hook: DisposeHook) -> Self {
        self.on_disposed = Some(hook);
        self
    }

    pub fn registry(&self) -> &Arc<RoomTypeRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Creates a room.
    ///
    /// # Errors
    /// - [`RoomError::RoomTypeNotFound`]: the type isn't registered;
    ///   nothing is written to the directory.
    /// - [`RoomError::Directory`]: the directory couldn't be updated.
    /// - [`RoomError::Handler`]: the type's `on_create` rejected the room.
    pub async fn create(&self, request: RoomRequest) -> Result<Arc<Room>, RoomError> {
        let descriptor = self
            .registry
            .get(&request.room_type)
            .ok_or_else(|| RoomError::RoomTypeNotFound(request.room_type.clone()))?;

        let room_id = generate_room_id();
        let options = merge_options(descriptor.default_options(), request.options);

        let room = Arc::new(Room::new(RoomParts {
            id: room_id.clone(),
            room_type: request.room_type,
            owner: request.owner,
            options,
            handler: Arc::clone(descriptor.handler()),
            directory: self.directory.clone(),
            owner_tx: request.owner_tx,
            on_disposed: self.on_disposed.clone(),
        }));

        let snapshot = room.snapshot().await;
        if let Err(e) = self.persist(&snapshot).await {
            tracing::warn!(%room_id, error = %e, "room registration failed, rolling back");
            self.rollback(&room_id).await;
            return Err(e.into());
        }

        if let Err(reason) = descriptor.handler().on_create(&room).await {
            tracing::warn!(%room_id, %reason, "room handler rejected creation, rolling back");
            self.rollback(&room_id).await;
            return Err(RoomError::Handler(reason));
        }

        let event = DirectoryEvent::RoomCreated {
            room_id: room_id.clone(),
            room_type: snapshot.room_type.clone(),
            owner: snapshot.owner.clone(),
        };
        if let Err(e) = self.directory.publish(&event).await {
            tracing::debug!(%room_id, error = %e, "failed to announce room creation");
        }

        tracing::info!(
            %room_id,
            room_type = %snapshot.room_type,
            owner = %snapshot.owner,
            "room created"
        );
        Ok(room)
    }

    /// Index first, then snapshot.
    async fn persist(&self, snapshot: &RoomSnapshot) -> Result<(), DirectoryError> {
        self.directory.append_room_id(&snapshot.id).await?;
        self.directory.write_snapshot(snapshot).await
    }

    async fn rollback(&self, room_id: &RoomId) {
        if let Err(e) = self.directory.unregister(room_id).await {
            tracing::error!(%room_id, error = %e, "rollback failed, directory entry may linger");
        }
    }
}
