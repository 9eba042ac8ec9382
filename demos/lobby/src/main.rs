use blueboat::prelude::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Room type
// ---------------------------------------------------------------------------

/// A waiting room. Publishes its capacity so lobby browsers on any server
/// can show it.
struct Lobby;

#[async_trait]
impl RoomHandler for Lobby {
    async fn on_create(&self, room: &Room) -> Result<(), String> {
        let capacity = room
            .options()
            .get("maxPlayers")
            .and_then(|v| v.as_u64())
            .ok_or("maxPlayers must be a positive integer")?;
        if capacity == 0 {
            return Err("maxPlayers must be a positive integer".into());
        }
        room.set_metadata("maxPlayers", capacity.to_string())
            .await
            .map_err(|e| e.to_string())
    }

    async fn on_dispose(&self, room: &Room) -> Result<(), String> {
        tracing::info!(room_id = %room.id(), "lobby closing");
        Ok(())
    }
}

fn lobby_defaults() -> RoomOptions {
    match json!({ "maxPlayers": 4 }) {
        serde_json::Value::Object(map) => map,
        _ => RoomOptions::new(),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::var("BLUEBOAT_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let server = RoomServer::builder()
        .bind(&bind)
        .register_room("lobby", Lobby, lobby_defaults())
        .build()
        .await?;

    // Log room traffic from every process sharing the directory.
    let mut events = server.lifecycle().directory().subscribe().await?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(?event, "directory event");
        }
    });

    let report = server.run().await?;
    tracing::info!(
        disposed = report.disposed.len(),
        failed = report.failed.len(),
        "lobby server stopped"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn send(ws: &mut Ws, payload: SystemMessage) {
        let bytes = serde_json::to_vec(&Envelope::new(0, 0, payload)).unwrap();
        ws.send(Message::Binary(bytes.into())).await.unwrap();
    }

    async fn recv(ws: &mut Ws) -> SystemMessage {
        loop {
            let msg = ws.next().await.unwrap().unwrap();
            if msg.is_binary() || msg.is_text() {
                let env: Envelope = serde_json::from_slice(&msg.into_data()).unwrap();
                return env.payload;
            }
        }
    }

    fn options(value: serde_json::Value) -> RoomOptions {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_lobby_capacity_is_published() {
        let server = RoomServer::builder()
            .bind("127.0.0.1:0")
            .register_room("lobby", Lobby, lobby_defaults())
            .build()
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run_until(std::future::pending()));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        send(&mut ws, SystemMessage::Handshake { version: PROTOCOL_VERSION, client_id: None }).await;
        assert!(matches!(recv(&mut ws).await, SystemMessage::HandshakeAck { .. }));

        send(
            &mut ws,
            SystemMessage::CreateRoom {
                room_type: "lobby".into(),
                options: options(json!({ "maxPlayers": 2 })),
            },
        )
        .await;
        assert!(matches!(recv(&mut ws).await, SystemMessage::RoomCreated { .. }));

        send(
            &mut ws,
            SystemMessage::CreateRoom {
                room_type: "lobby".into(),
                options: options(json!({ "maxPlayers": 0 })),
            },
        )
        .await;
        match recv(&mut ws).await {
            SystemMessage::Error { code, .. } => assert_eq!(code, 400),
            other => panic!("expected Error, got {other:?}"),
        }

        send(&mut ws, SystemMessage::ListRooms { room_type: Some("lobby".into()) }).await;
        match recv(&mut ws).await {
            SystemMessage::RoomList { rooms } => {
                assert_eq!(rooms.len(), 1);
                assert_eq!(rooms[0].metadata.get("maxPlayers").map(String::as_str), Some("2"));
            }
            other => panic!("expected RoomList, got {other:?}"),
        }
    }
}
