//! Per-connection handler: handshake, then room requests until the
//! client leaves or the server shuts down.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version → send HandshakeAck
//!   2. Loop over three sources, whichever is ready first:
//!      - client envelopes (CreateRoom, DisposeRoom, ListRooms, ...)
//!      - notices from rooms this client owns (RoomDisposed)
//!      - the server closing
//!   3. On exit, optionally dispose the rooms this client created

use std::sync::Arc;

use blueboat_protocol::{
    ClientId, Codec, Envelope, ProtocolError, RoomId, RoomOptions, SystemMessage,
};
use blueboat_room::RoomRequest;
use blueboat_transport::{Connection, WebSocketConnection};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::ServerError;
use crate::server::{PROTOCOL_VERSION, ServerState};

/// What the message loop should do after handling a message.
enum Flow {
    Continue,
    Close,
}

/// One handshaken client.
struct Session<'a, C: Codec> {
    conn: &'a WebSocketConnection,
    state: &'a ServerState<C>,
    client_id: ClientId,
    notices: mpsc::UnboundedSender<SystemMessage>,
    created: Vec<RoomId>,
    seq: u64,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
    mut closing: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    let client_id = perform_handshake(&conn, &state).await?;
    tracing::info!(%conn_id, %client_id, "client connected");

    let (notices, mut notice_rx) = mpsc::unbounded_channel();
    let mut session = Session {
        conn: &conn,
        state: &state,
        client_id,
        notices,
        created: Vec::new(),
        seq: 1,
    };

    // Only client traffic counts as activity; notices to the client don't.
    let idle_timeout = state.config.idle_timeout;
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    let outcome = loop {
        tokio::select! {
            // notices first, so RoomDisposed reaches the owner before the goodbye
            biased;

            Some(notice) = notice_rx.recv() => {
                if let Err(e) = session.send(notice).await {
                    break Err(e);
                }
            }

            _ = closing.changed() => {
                let reason = "server shutting down".to_string();
                break session.send(SystemMessage::Disconnect { reason }).await;
            }

            received = conn.recv() => {
                idle.as_mut().reset(Instant::now() + idle_timeout);
                let data = match received {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(client_id = %session.client_id, "connection closed cleanly");
                        break Ok(());
                    }
                    Err(e) => break Err(e.into()),
                };

                match session.handle_envelope(&data).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }

            () = &mut idle => {
                tracing::info!(client_id = %session.client_id, "connection timed out");
                break Ok(());
            }
        }
    };

    session.release_rooms().await;
    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
    outcome
}

/// Receives the Handshake, checks the version, answers with HandshakeAck.
async fn perform_handshake<C: Codec>(
    conn: &WebSocketConnection,
    state: &ServerState<C>,
) -> Result<ClientId, ServerError> {
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let envelope: Envelope = state.codec.decode(&data)?;

    let (version, client_id) = match envelope.payload {
        SystemMessage::Handshake { version, client_id } => (version, client_id),
        _ => {
            send_error(conn, state, 0, 400, "expected Handshake").await?;
            return Err(
                ProtocolError::InvalidMessage("first message must be Handshake".into()).into(),
            );
        }
    };

    if version != PROTOCOL_VERSION {
        let message = format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}");
        send_error(conn, state, 0, 400, &message).await?;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    let client_id =
        client_id.unwrap_or_else(|| ClientId::new(format!("client-{}", conn.id().into_inner())));

    let ack = Envelope::new(
        0,
        state.server_time(),
        SystemMessage::HandshakeAck {
            client_id: client_id.clone(),
            server_time: state.server_time(),
        },
    );
    conn.send(&state.codec.encode(&ack)?).await?;

    Ok(client_id)
}

impl<C: Codec> Session<'_, C> {
    async fn handle_envelope(&mut self, data: &[u8]) -> Result<Flow, ServerError> {
        let envelope: Envelope = match self.state.codec.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(client_id = %self.client_id, error = %e, "failed to decode envelope");
                self.send_error(400, &format!("malformed envelope: {e}")).await?;
                return Ok(Flow::Continue);
            }
        };

        match envelope.payload {
            SystemMessage::Heartbeat { client_time } => {
                let server_time = self.state.server_time();
                self.send(SystemMessage::HeartbeatAck {
                    client_time,
                    server_time,
                })
                .await?;
            }

            SystemMessage::CreateRoom { room_type, options } => {
                self.create_room(room_type, options).await?;
            }

            SystemMessage::DisposeRoom { room_id } => {
                self.dispose_room(room_id).await?;
            }

            SystemMessage::ListRooms { room_type } => {
                self.list_rooms(room_type.as_deref()).await?;
            }

            SystemMessage::Disconnect { reason } => {
                tracing::info!(client_id = %self.client_id, %reason, "client disconnected");
                return Ok(Flow::Close);
            }

            _ => {
                tracing::debug!(client_id = %self.client_id, "ignoring unexpected system message");
                self.send_error(400, "unexpected message").await?;
            }
        }

        Ok(Flow::Continue)
    }

    async fn create_room(
        &mut self,
        room_type: String,
        options: RoomOptions,
    ) -> Result<(), ServerError> {
        let request = RoomRequest::new(room_type, options, self.client_id.clone())
            .with_owner_channel(self.notices.clone());

        match self.state.lifecycle.create_room(request).await {
            Ok(room) => {
                self.created.push(room.id().clone());
                self.send(SystemMessage::RoomCreated {
                    room_id: room.id().clone(),
                    room_type: room.room_type().to_string(),
                })
                .await
            }
            Err(e) => self.report(e).await,
        }
    }

    /// Only the owner may dispose a room. The `RoomDisposed` reply comes
    /// from the room itself, through the notice channel.
    async fn dispose_room(&mut self, room_id: RoomId) -> Result<(), ServerError> {
        let Some(room) = self.state.lifecycle.room(&room_id) else {
            return self.send_error(404, &format!("room {room_id} not found")).await;
        };
        if room.owner() != &self.client_id {
            return self.report(ServerError::NotOwner { room_id }).await;
        }

        let timeout = self.state.config.dispose_timeout;
        match tokio::time::timeout(timeout, room.dispose()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => self.report(e.into()).await,
            Err(_) => {
                tracing::warn!(%room_id, ?timeout, "owner dispose timed out");
                self.send_error(500, &format!("dispose of room {room_id} timed out"))
                    .await
            }
        }
    }

    async fn list_rooms(&mut self, room_type: Option<&str>) -> Result<(), ServerError> {
        let directory = self.state.lifecycle.directory();
        let listed = match room_type {
            Some(room_type) => directory.find_rooms(room_type).await,
            None => directory.list_rooms().await,
        };

        match listed {
            Ok(rooms) => self.send(SystemMessage::RoomList { rooms }).await,
            Err(e) => self.report(e.into()).await,
        }
    }

    /// Disposes the rooms this client created, if the server is set up to.
    async fn release_rooms(&mut self) {
        if !self.state.config.dispose_on_disconnect {
            return;
        }
        for room_id in self.created.drain(..) {
            let Some(room) = self.state.lifecycle.room(&room_id) else {
                continue;
            };
            if let Err(e) = room.dispose().await {
                tracing::warn!(%room_id, error = %e, "failed to dispose room of departed client");
            }
        }
    }

    async fn send(&mut self, payload: SystemMessage) -> Result<(), ServerError> {
        let seq = next_seq(&mut self.seq);
        let envelope = Envelope::new(seq, self.state.server_time(), payload);
        let bytes = self.state.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn send_error(&mut self, code: u16, message: &str) -> Result<(), ServerError> {
        self.send(SystemMessage::Error {
            code,
            message: message.to_string(),
        })
        .await
    }

    /// Tells the client a request failed.
    async fn report(&mut self, error: ServerError) -> Result<(), ServerError> {
        tracing::debug!(client_id = %self.client_id, error = %error, "request failed");
        self.send_error(error.code(), &error.to_string()).await
    }
}

/// Sends a `SystemMessage::Error` envelope before the session exists.
async fn send_error<C: Codec>(
    conn: &WebSocketConnection,
    state: &ServerState<C>,
    seq: u64,
    code: u16,
    message: &str,
) -> Result<(), ServerError> {
    let envelope = Envelope::new(
        seq,
        state.server_time(),
        SystemMessage::Error {
            code,
            message: message.to_string(),
        },
    );
    conn.send(&state.codec.encode(&envelope)?).await?;
    Ok(())
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
