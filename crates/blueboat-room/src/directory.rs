//! The cluster-wide room directory.
//!
//! Two kinds of records live in the shared store:
//!
//! ```text
//! <index_key>             → ["V1StGXR8_Z5jdHi6B-myT", "Uakgb_J5m9g-0JDMbcJqL"]
//! <room_prefix><room id>  → {"id": "...", "type": "lobby", "owner": "...", "metadata": {}}
//! ```
//!
//! The index is one JSON array shared by every process, so it is only ever
//! mutated through the store's compare-and-set: read, modify, write back
//! only if nobody else wrote in between, otherwise re-read and retry.
//! Concurrent creations on different processes therefore never drop each
//! other's ids.
//!
//! The index and the snapshots are written separately with no transaction
//! spanning them. Readers tolerate an index id whose snapshot is missing.

use std::future::Future;
use std::sync::Arc;

use blueboat_protocol::{DirectoryEvent, RoomId, RoomSnapshot};
use blueboat_store::{KeyValueStore, PubSub, StoreError, Subscription};

use crate::{DirectoryConfig, DirectoryError};

/// Handle to the shared room directory. Cheap to clone.
#[derive(Clone)]
pub struct RoomDirectory {
    store: Arc<dyn KeyValueStore>,
    pubsub: Arc<dyn PubSub>,
    config: Arc<DirectoryConfig>,
}

impl RoomDirectory {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        pubsub: Arc<dyn PubSub>,
        config: DirectoryConfig,
    ) -> Self {
        Self {
            store,
            pubsub,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// The store key holding the snapshot for `room_id`.
    pub fn snapshot_key(&self, room_id: &RoomId) -> String {
        format!("{}{}", self.config.room_prefix, room_id)
    }

    // -----------------------------------------------------------------
    // Index
    // -----------------------------------------------------------------

    /// Returns every room id currently in the index, in insertion order.
    pub async fn room_ids(&self) -> Result<Vec<RoomId>, DirectoryError> {
        let (_, ids) = self.read_index().await?;
        Ok(ids)
    }

    /// Appends `room_id` to the index. Appending an id that is already
    /// present is a no-op, so each id appears at most once.
    pub async fn append_room_id(&self, room_id: &RoomId) -> Result<(), DirectoryError> {
        self.update_index("append_room_id", |ids| {
            if ids.contains(room_id) {
                return false;
            }
            ids.push(room_id.clone());
            true
        })
        .await
    }

    /// Removes `room_id` from the index. Removing an absent id is a no-op.
    pub async fn remove_room_id(&self, room_id: &RoomId) -> Result<(), DirectoryError> {
        self.update_index("remove_room_id", |ids| {
            let before = ids.len();
            ids.retain(|id| id != room_id);
            ids.len() != before
        })
        .await
    }

    /// Reads the index. A missing key and an unparseable value both read
    /// as an empty index; the raw value is returned for compare-and-set.
    async fn read_index(&self) -> Result<(Option<String>, Vec<RoomId>), DirectoryError> {
        let key = &self.config.index_key;
        let raw = self.bounded("read_index", self.store.get(key)).await?;
        let ids = match raw.as_deref() {
            None => Vec::new(),
            Some(value) => serde_json::from_str(value).unwrap_or_else(|e| {
                tracing::warn!(key = %key, error = %e, "room index is malformed, treating as empty");
                Vec::new()
            }),
        };
        Ok((raw, ids))
    }

    /// Applies `modify` to the index and writes the result back with
    /// compare-and-set, retrying while other writers interfere. `modify`
    /// returns `false` when there is nothing to write.
    async fn update_index<F>(&self, op: &'static str, mut modify: F) -> Result<(), DirectoryError>
    where
        F: FnMut(&mut Vec<RoomId>) -> bool,
    {
        let key = &self.config.index_key;
        for attempt in 1..=self.config.max_cas_retries {
            let (raw, mut ids) = self.read_index().await?;
            if !modify(&mut ids) {
                return Ok(());
            }
            let value = serde_json::to_string(&ids).map_err(|source| DirectoryError::Serialize {
                what: "room index",
                source,
            })?;
            let written = self
                .bounded(op, self.store.compare_and_set(key, raw.as_deref(), value))
                .await?;
            if written {
                return Ok(());
            }
            tracing::debug!(key = %key, op, attempt, "room index changed concurrently, retrying");
        }
        Err(DirectoryError::Contention {
            key: key.clone(),
            attempts: self.config.max_cas_retries,
        })
    }

    // -----------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------

    /// Persists `snapshot` under its room's key, replacing any previous
    /// version.
    pub async fn write_snapshot(&self, snapshot: &RoomSnapshot) -> Result<(), DirectoryError> {
        let value = serde_json::to_string(snapshot).map_err(|source| DirectoryError::Serialize {
            what: "room snapshot",
            source,
        })?;
        let key = self.snapshot_key(&snapshot.id);
        self.bounded("write_snapshot", self.store.set(&key, value)).await
    }

    /// Reads the snapshot for `room_id`, or `None` if there isn't one.
    pub async fn read_snapshot(&self, room_id: &RoomId) -> Result<Option<RoomSnapshot>, DirectoryError> {
        let key = self.snapshot_key(room_id);
        let Some(raw) = self.bounded("read_snapshot", self.store.get(&key)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| DirectoryError::Corrupt { key, source })
    }

    /// Deletes the snapshot for `room_id`. Deleting a missing snapshot is
    /// not an error.
    pub async fn delete_snapshot(&self, room_id: &RoomId) -> Result<(), DirectoryError> {
        let key = self.snapshot_key(room_id);
        self.bounded("delete_snapshot", self.store.delete(&key)).await?;
        Ok(())
    }

    /// Removes every trace of `room_id`: its index entry and its snapshot.
    ///
    /// Both removals are attempted even if the first fails; the first
    /// error is returned.
    pub async fn unregister(&self, room_id: &RoomId) -> Result<(), DirectoryError> {
        let index = self.remove_room_id(room_id).await;
        let snapshot = self.delete_snapshot(room_id).await;
        index.and(snapshot)
    }

    // -----------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------

    /// Returns the snapshots of every room in the cluster.
    ///
    /// Index ids without a readable snapshot are skipped: they are either
    /// mid-creation, mid-disposal, or drift left behind by a crashed
    /// process.
    pub async fn list_rooms(&self) -> Result<Vec<RoomSnapshot>, DirectoryError> {
        let ids = self.room_ids().await?;
        let mut rooms = Vec::with_capacity(ids.len());
        for room_id in &ids {
            match self.read_snapshot(room_id).await {
                Ok(Some(snapshot)) => rooms.push(snapshot),
                Ok(None) => {
                    tracing::warn!(%room_id, "indexed room has no snapshot, skipping");
                }
                Err(e) => {
                    tracing::warn!(%room_id, error = %e, "unreadable room snapshot, skipping");
                }
            }
        }
        Ok(rooms)
    }

    /// Returns the snapshots of every room of the given type.
    pub async fn find_rooms(&self, room_type: &str) -> Result<Vec<RoomSnapshot>, DirectoryError> {
        let mut rooms = self.list_rooms().await?;
        rooms.retain(|room| room.room_type == room_type);
        Ok(rooms)
    }

    // -----------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------

    /// Broadcasts a directory event to every subscribed process.
    pub async fn publish(&self, event: &DirectoryEvent) -> Result<(), DirectoryError> {
        let payload = serde_json::to_string(event).map_err(|source| DirectoryError::Serialize {
            what: "directory event",
            source,
        })?;
        let channel = &self.config.events_channel;
        self.bounded("publish", self.pubsub.publish(channel, payload)).await?;
        Ok(())
    }

    /// Subscribes to directory events from every process.
    pub async fn subscribe(&self) -> Result<DirectoryEvents, DirectoryError> {
        let channel = &self.config.events_channel;
        let subscription = self.bounded("subscribe", self.pubsub.subscribe(channel)).await?;
        Ok(DirectoryEvents { subscription })
    }

    /// Runs a store call under the configured timeout.
    async fn bounded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, DirectoryError> {
        let after = self.config.op_timeout;
        match tokio::time::timeout(after, call).await {
            Ok(result) => result.map_err(DirectoryError::Store),
            Err(_) => {
                tracing::warn!(op, ?after, "directory operation timed out");
                Err(DirectoryError::Timeout { op, after })
            }
        }
    }
}

/// A stream of [`DirectoryEvent`]s.
#[derive(Debug)]
pub struct DirectoryEvents {
    subscription: Subscription,
}

impl DirectoryEvents {
    /// Waits for the next event. Payloads that don't parse are skipped.
    /// Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<DirectoryEvent> {
        loop {
            let payload = self.subscription.recv().await?;
            match serde_json::from_str(&payload) {
                Ok(event) => return Some(event),
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring malformed directory event");
                }
            }
        }
    }
}
