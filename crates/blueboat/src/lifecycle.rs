//! Ownership of this process's rooms, and the orderly shutdown that
//! disposes them.
//!
//! ```text
//! Running ──shutdown(trigger)──→ ShuttingDown ──all rooms settled──→ Terminated
//! ```
//!
//! While running, every room the factory creates is recorded here and
//! dropped again when it disposes itself. Once shutdown starts no room is
//! admitted, and every recorded room is disposed concurrently, each within
//! its own time bound. Failures are collected into a [`ShutdownReport`],
//! never propagated, so one stuck room can't keep the others alive.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use blueboat_protocol::RoomId;
use blueboat_room::{
    DisposeHook, Room, RoomDirectory, RoomError, RoomFactory, RoomRequest, RoomTypeRegistry,
};
use futures_util::future::join_all;

use crate::ServerError;

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting down"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Why the server is stopping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// A termination signal arrived (`SIGINT`, `SIGTERM`, `SIGUSR2`).
    Signal(&'static str),
    /// Something went irrecoverably wrong; the reason is logged at error.
    Fatal(String),
    /// The embedding application asked for it.
    Requested,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal {name}"),
            Self::Fatal(reason) => write!(f, "fatal error: {reason}"),
            Self::Requested => write!(f, "requested"),
        }
    }
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Rooms disposed cleanly.
    pub disposed: Vec<RoomId>,
    /// Rooms whose disposal failed or timed out, with the reason.
    pub failed: Vec<(RoomId, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of rooms the shutdown dealt with.
    pub fn total(&self) -> usize {
        self.disposed.len() + self.failed.len()
    }
}

/// Phase and rooms share one lock so that admitting a room and starting a
/// shutdown can't interleave.
#[derive(Default)]
struct Tracked {
    phase: Phase,
    rooms: HashMap<RoomId, Arc<Room>>,
}

/// The dispose hook runs synchronously inside `Room::dispose`, hence a
/// std mutex. A poisoned lock still holds a consistent map.
fn lock(tracked: &Mutex<Tracked>) -> MutexGuard<'_, Tracked> {
    tracked.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every room this process hosts.
///
/// Created once per server and shared by `Arc` with each connection task.
pub struct LifecycleManager {
    factory: RoomFactory,
    tracked: Arc<Mutex<Tracked>>,
    dispose_timeout: Duration,
}

impl LifecycleManager {
    /// Creates a running manager whose rooms are built from `registry` and
    /// recorded in `directory`.
    pub fn new(
        registry: Arc<RoomTypeRegistry>,
        directory: RoomDirectory,
        dispose_timeout: Duration,
    ) -> Self {
        let tracked = Arc::new(Mutex::new(Tracked::default()));

        // Weak, so rooms holding the hook don't keep the map alive.
        let weak = Arc::downgrade(&tracked);
        let on_disposed: DisposeHook = Arc::new(move |room_id: &RoomId| {
            let Some(tracked) = weak.upgrade() else {
                return;
            };
            let mut tracked = lock(&tracked);
            if tracked.rooms.remove(room_id).is_some() {
                tracing::debug!(%room_id, remaining = tracked.rooms.len(), "room released");
            }
        });

        Self {
            factory: RoomFactory::new(registry, directory).on_disposed(on_disposed),
            tracked,
            dispose_timeout,
        }
    }

    pub fn phase(&self) -> Phase {
        lock(&self.tracked).phase
    }

    pub fn registry(&self) -> &Arc<RoomTypeRegistry> {
        self.factory.registry()
    }

    pub fn directory(&self) -> &RoomDirectory {
        self.factory.directory()
    }

    /// Creates a room and takes ownership of it.
    ///
    /// # Errors
    /// [`ServerError::ShuttingDown`] once shutdown has begun, including
    /// when it begins while this room is being created (the new room is
    /// disposed again). Otherwise whatever the factory reports.
    pub async fn create_room(&self, request: RoomRequest) -> Result<Arc<Room>, ServerError> {
        if self.phase() != Phase::Running {
            return Err(ServerError::ShuttingDown);
        }

        let room = self.factory.create(request).await?;

        let admitted = {
            let mut tracked = lock(&self.tracked);
            if tracked.phase == Phase::Running {
                tracked.rooms.insert(room.id().clone(), Arc::clone(&room));
                true
            } else {
                false
            }
        };

        if !admitted {
            tracing::info!(room_id = %room.id(), "shutdown began during creation, disposing new room");
            if let Err(e) = room.dispose().await {
                tracing::warn!(room_id = %room.id(), error = %e, "late room failed to dispose");
            }
            return Err(ServerError::ShuttingDown);
        }

        Ok(room)
    }

    /// Disposes one of this process's rooms.
    pub async fn dispose_room(&self, room_id: &RoomId) -> Result<(), ServerError> {
        let room = self
            .room(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))?;
        room.dispose().await?;
        Ok(())
    }

    pub fn room(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        lock(&self.tracked).rooms.get(room_id).cloned()
    }

    /// Ids of all rooms this process currently owns, sorted.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = lock(&self.tracked).rooms.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn room_count(&self) -> usize {
        lock(&self.tracked).rooms.len()
    }

    /// Stops admitting rooms and disposes every room still owned.
    ///
    /// Each disposal is bounded by the dispose timeout. Failures are logged
    /// and reported, never returned. Only the first call does anything;
    /// later calls get an empty report.
    pub async fn shutdown(&self, trigger: ShutdownTrigger) -> ShutdownReport {
        let rooms: Vec<Arc<Room>> = {
            let mut tracked = lock(&self.tracked);
            if tracked.phase != Phase::Running {
                tracing::debug!(phase = %tracked.phase, "shutdown already under way");
                return ShutdownReport::default();
            }
            tracked.phase = Phase::ShuttingDown;
            tracked.rooms.values().cloned().collect()
        };

        match &trigger {
            ShutdownTrigger::Fatal(reason) => {
                tracing::error!(%reason, rooms = rooms.len(), "fatal error, shutting down");
            }
            other => {
                tracing::info!(trigger = %other, rooms = rooms.len(), "shutting down");
            }
        }

        let timeout = self.dispose_timeout;
        let outcomes = join_all(rooms.iter().map(|room| async move {
            let outcome = match tokio::time::timeout(timeout, room.dispose()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("dispose timed out after {timeout:?}")),
            };
            (room.id().clone(), outcome)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (room_id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.disposed.push(room_id),
                Err(reason) => {
                    tracing::warn!(%room_id, %reason, "room failed to dispose");
                    report.failed.push((room_id, reason));
                }
            }
        }

        {
            let mut tracked = lock(&self.tracked);
            // rooms that timed out never reached their hook
            tracked.rooms.clear();
            tracked.phase = Phase::Terminated;
        }

        tracing::info!(
            disposed = report.disposed.len(),
            failed = report.failed.len(),
            "shutdown complete"
        );
        report
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = lock(&self.tracked);
        f.debug_struct("LifecycleManager")
            .field("phase", &tracked.phase)
            .field("rooms", &tracked.rooms.len())
            .finish_non_exhaustive()
    }
}
