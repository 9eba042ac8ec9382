//! Cluster-shared storage for Blueboat.
//!
//! Rooms are registered in a key-value store and announced on a pub/sub
//! channel that every server process can reach. This crate defines the two
//! narrow interfaces the room layer talks to, plus in-process
//! implementations used for single-node deployments and tests:
//!
//! - [`KeyValueStore`] / [`MemoryStore`]: get, set, delete, and an atomic
//!   compare-and-set used to mutate shared values without lost updates.
//! - [`PubSub`] / [`MemoryPubSub`]: fire-and-forget channel broadcast.
//!
//! Both traits are object-safe (`async_trait`) so a server can hold
//! `Arc<dyn KeyValueStore>` and swap the backend at startup.

mod error;
mod kv;
mod pubsub;

pub use error::StoreError;
pub use kv::{KeyValueStore, MemoryStore};
pub use pubsub::{MemoryPubSub, PubSub, Subscription};
