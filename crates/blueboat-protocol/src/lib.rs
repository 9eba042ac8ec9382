//! Shared vocabulary for Blueboat.
//!
//! Every process in a cluster has to agree on three things, and they all
//! live here:
//!
//! - **Identity** ([`RoomId`], [`ClientId`]): how rooms and their owners
//!   are named.
//! - **Directory records** ([`RoomSnapshot`], [`DirectoryEvent`]): what is
//!   written to the shared key-value store and broadcast on the pub/sub
//!   channel.
//! - **Client messages** ([`Envelope`], [`SystemMessage`], [`Codec`]): the
//!   small set of room-management messages a connection can exchange with
//!   a server.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Room lifecycle
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ClientId, DirectoryEvent, Envelope, RoomId, RoomOptions, RoomSnapshot,
    SystemMessage,
};
