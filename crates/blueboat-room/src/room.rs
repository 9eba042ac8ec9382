//! A live room owned by this process.
//!
//! Rooms are shared as `Arc<Room>` between the lifecycle manager and the
//! connection that created them. Teardown can be requested from either
//! side at the same time (an owner's `DisposeRoom` racing a server
//! shutdown), so [`Room::dispose`] claims the room under its state lock.
//! A call that arrives while another is tearing the room down waits for
//! it and shares its outcome; a call after that returns immediately.

use std::collections::BTreeMap;
use std::sync::Arc;

use blueboat_protocol::{
    ClientId, DirectoryEvent, RoomId, RoomOptions, RoomSnapshot, SystemMessage,
};
use tokio::sync::{Mutex, mpsc, watch};

use crate::{RoomDirectory, RoomError, RoomHandler, RoomState};

/// Channel for pushing notices to the owner's connection.
pub type OwnerSender = mpsc::UnboundedSender<SystemMessage>;

/// Called exactly once when a room finishes disposing, so the owning
/// lifecycle manager can drop its record.
pub type DisposeHook = Arc<dyn Fn(&RoomId) + Send + Sync>;

/// Published once teardown finishes. `Some(reason)` if it failed.
type Teardown = Option<Option<String>>;

/// One running room.
pub struct Room {
    id: RoomId,
    room_type: String,
    owner: ClientId,
    options: RoomOptions,
    handler: Arc<dyn RoomHandler>,
    directory: RoomDirectory,
    owner_tx: Option<OwnerSender>,
    on_disposed: Option<DisposeHook>,
    state: Mutex<RoomState>,
    metadata: Mutex<BTreeMap<String, String>>,
    teardown: watch::Sender<Teardown>,
}

/// Everything the factory gathers before constructing a room.
pub(crate) struct RoomParts {
    pub(crate) id: RoomId,
    pub(crate) room_type: String,
    pub(crate) owner: ClientId,
    pub(crate) options: RoomOptions,
    pub(crate) handler: Arc<dyn RoomHandler>,
    pub(crate) directory: RoomDirectory,
    pub(crate) owner_tx: Option<OwnerSender>,
    pub(crate) on_disposed: Option<DisposeHook>,
}

impl Room {
    pub(crate) fn new(parts: RoomParts) -> Self {
        Self {
            id: parts.id,
            room_type: parts.room_type,
            owner: parts.owner,
            options: parts.options,
            handler: parts.handler,
            directory: parts.directory,
            owner_tx: parts.owner_tx,
            on_disposed: parts.on_disposed,
            state: Mutex::new(RoomState::Active),
            metadata: Mutex::new(BTreeMap::new()),
            teardown: watch::Sender::new(None),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// The registered type this room was created from.
    pub fn room_type(&self) -> &str {
        &self.room_type
    }

    pub fn owner(&self) -> &ClientId {
        &self.owner
    }

    /// The merged options: type defaults overridden by the creation
    /// request.
    pub fn options(&self) -> &RoomOptions {
        &self.options
    }

    /// The shared directory, for handlers that persist their own records.
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    pub async fn state(&self) -> RoomState {
        *self.state.lock().await
    }

    pub async fn is_disposed(&self) -> bool {
        !self.state().await.is_active()
    }

    /// The directory record for this room as it currently stands.
    pub async fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            room_type: self.room_type.clone(),
            owner: self.owner.clone(),
            metadata: self.metadata.lock().await.clone(),
        }
    }

    /// Sets a metadata entry and re-persists the snapshot so other
    /// processes see it.
    ///
    /// Holds the state lock until the write lands, so a concurrent
    /// `dispose` deletes the snapshot after it rather than before.
    pub async fn set_metadata(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), RoomError> {
        let state = self.state.lock().await;
        if !state.is_active() {
            return Err(RoomError::NotFound(self.id.clone()));
        }
        self.metadata.lock().await.insert(key.into(), value.into());
        let snapshot = self.snapshot().await;
        self.directory.write_snapshot(&snapshot).await?;
        drop(state);
        Ok(())
    }

    /// Tears the room down. Safe to call any number of times; only the
    /// first call does any work. Calls made while that work is running
    /// wait for it and return its result.
    ///
    /// Runs the handler's `on_dispose`, removes the room from the
    /// directory, announces the disposal, tells the owner, and finally
    /// signals the lifecycle manager. A failing step doesn't stop the later
    /// ones, and the manager is always signalled; the first failure is
    /// returned as [`RoomError::DisposalFailed`].
    pub async fn dispose(&self) -> Result<(), RoomError> {
        let waiting = {
            let mut state = self.state.lock().await;
            match *state {
                RoomState::Active => {
                    *state = RoomState::Disposing;
                    None
                }
                RoomState::Disposing => Some(self.teardown.subscribe()),
                RoomState::Disposed => {
                    tracing::debug!(room_id = %self.id, "room already disposed, skipping");
                    return Ok(());
                }
            }
        };

        if let Some(mut teardown) = waiting {
            tracing::debug!(room_id = %self.id, "room is disposing, waiting for it");
            // The sender lives in `self`, so this only ends once it is set.
            let failure = match teardown.wait_for(Option::is_some).await {
                Ok(outcome) => (*outcome).clone().flatten(),
                Err(_) => None,
            };
            return self.disposal_result(failure);
        }

        let mut failure: Option<String> = None;

        if let Err(reason) = self.handler.on_dispose(self).await {
            tracing::warn!(room_id = %self.id, %reason, "room handler failed during dispose");
            failure.get_or_insert(reason);
        }

        if let Err(e) = self.directory.unregister(&self.id).await {
            tracing::warn!(room_id = %self.id, error = %e, "failed to remove room from directory");
            failure.get_or_insert_with(|| e.to_string());
        }

        let event = DirectoryEvent::RoomDisposed {
            room_id: self.id.clone(),
        };
        if let Err(e) = self.directory.publish(&event).await {
            tracing::debug!(room_id = %self.id, error = %e, "failed to announce room disposal");
        }

        if let Some(owner_tx) = &self.owner_tx {
            // The owner may already be gone; that's fine.
            let _ = owner_tx.send(SystemMessage::RoomDisposed {
                room_id: self.id.clone(),
            });
        }

        {
            let mut state = self.state.lock().await;
            *state = RoomState::Disposed;
            self.teardown.send_replace(Some(failure.clone()));
        }
        if let Some(hook) = &self.on_disposed {
            hook(&self.id);
        }

        tracing::info!(room_id = %self.id, room_type = %self.room_type, "room disposed");

        self.disposal_result(failure)
    }

    fn disposal_result(&self, failure: Option<String>) -> Result<(), RoomError> {
        match failure {
            None => Ok(()),
            Some(reason) => Err(RoomError::DisposalFailed {
                room_id: self.id.clone(),
                reason,
            }),
        }
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("room_type", &self.room_type)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
