//! # Blueboat
//!
//! Multiplayer room server. Applications register room types, clients
//! ask for rooms by type name, and the server keeps a directory of live
//! rooms in a key-value store shared by every server process.
//!
//! Each process owns the rooms it created. When it is told to stop (a
//! signal, or a fatal listener error) it stops accepting, disposes every
//! room it owns so none linger in the shared directory, and exits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blueboat::prelude::*;
//!
//! struct Lobby;
//!
//! #[async_trait]
//! impl RoomHandler for Lobby {}
//!
//! # async fn start() -> Result<(), ServerError> {
//! let server = RoomServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .register_room("lobby", Lobby, RoomOptions::new())
//!     .build()
//!     .await?;
//! let report = server.run().await?;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handler;
mod lifecycle;
mod server;
mod signal;

pub use config::ServerConfig;
pub use error::ServerError;
pub use lifecycle::{LifecycleManager, Phase, ShutdownReport, ShutdownTrigger};
pub use server::{PROTOCOL_VERSION, RoomServer, RoomServerBuilder};
pub use signal::shutdown_signal;

/// Everything needed to write room types and run a server.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use blueboat_protocol::{
        ClientId, DirectoryEvent, Envelope, RoomId, RoomOptions, RoomSnapshot, SystemMessage,
    };
    pub use blueboat_room::{
        DirectoryConfig, DirectoryError, Room, RoomDirectory, RoomError, RoomHandler,
        RoomRequest, RoomState, RoomTypeRegistry,
    };
    pub use blueboat_store::{KeyValueStore, MemoryPubSub, MemoryStore, PubSub, StoreError};

    pub use crate::{
        LifecycleManager, PROTOCOL_VERSION, Phase, RoomServer, RoomServerBuilder, ServerConfig,
        ServerError, ShutdownReport, ShutdownTrigger,
    };
}
