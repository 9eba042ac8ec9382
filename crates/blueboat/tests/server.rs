//! Integration tests for the room server: handshake, room requests over a
//! real WebSocket, and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blueboat::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Room types
// =========================================================================

struct Lobby;

#[async_trait]
impl RoomHandler for Lobby {}

/// Fails its teardown, to exercise shutdown error collection.
struct Leaky;

#[async_trait]
impl RoomHandler for Leaky {
    async fn on_dispose(&self, _room: &Room) -> Result<(), String> {
        Err("leaked a timer".into())
    }
}

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<ShutdownReport, ServerError>>,
    lifecycle: Arc<LifecycleManager>,
}

fn options(value: serde_json::Value) -> RoomOptions {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn builder() -> RoomServerBuilder {
    RoomServer::builder()
        .bind("127.0.0.1:0")
        .register_room("lobby", Lobby, options(json!({"maxPlayers": 4})))
        .register_room("leaky", Leaky, RoomOptions::new())
}

/// Starts a server that runs until `stop` is sent.
async fn start(builder: RoomServerBuilder) -> Running {
    start_with(builder, ShutdownTrigger::Requested).await
}

/// Like [`start`], but `stop` shuts the server down with `trigger`.
async fn start_with(builder: RoomServerBuilder, trigger: ShutdownTrigger) -> Running {
    let server = builder.build().await.expect("server should build");
    let addr = server.local_addr().expect("should have local addr");
    let lifecycle = server.lifecycle();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async move {
        let _ = stopped.await;
        trigger
    }));

    Running {
        addr,
        stop,
        task,
        lifecycle,
    }
}

async fn connect(addr: SocketAddr) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, payload: SystemMessage) {
    let bytes = serde_json::to_vec(&Envelope::new(0, 0, payload)).expect("encode");
    ws.send(Message::Binary(bytes.into())).await.expect("send");
}

/// Next server payload, skipping control frames.
async fn recv(ws: &mut ClientWs) -> SystemMessage {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("server should answer in time")
            .expect("stream should be open")
            .expect("frame should be valid");
        if msg.is_binary() || msg.is_text() {
            let envelope: Envelope = serde_json::from_slice(&msg.into_data()).expect("decode");
            return envelope.payload;
        }
    }
}

async fn handshake(ws: &mut ClientWs, client_id: Option<&str>) -> ClientId {
    send(
        ws,
        SystemMessage::Handshake {
            version: PROTOCOL_VERSION,
            client_id: client_id.map(ClientId::from),
        },
    )
    .await;
    match recv(ws).await {
        SystemMessage::HandshakeAck { client_id, .. } => client_id,
        other => panic!("expected HandshakeAck, got {other:?}"),
    }
}

async fn client(addr: SocketAddr, client_id: &str) -> ClientWs {
    let mut ws = connect(addr).await;
    handshake(&mut ws, Some(client_id)).await;
    ws
}

async fn create_room(ws: &mut ClientWs, room_type: &str, opts: RoomOptions) -> SystemMessage {
    send(
        ws,
        SystemMessage::CreateRoom {
            room_type: room_type.into(),
            options: opts,
        },
    )
    .await;
    recv(ws).await
}

async fn create_lobby(ws: &mut ClientWs) -> RoomId {
    match create_room(ws, "lobby", RoomOptions::new()).await {
        SystemMessage::RoomCreated { room_id, room_type } => {
            assert_eq!(room_type, "lobby");
            room_id
        }
        other => panic!("expected RoomCreated, got {other:?}"),
    }
}

fn error_code(msg: &SystemMessage) -> u16 {
    match msg {
        SystemMessage::Error { code, .. } => *code,
        other => panic!("expected Error, got {other:?}"),
    }
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_keeps_client_id() {
    let server = start(builder()).await;
    let mut ws = connect(server.addr).await;

    assert_eq!(handshake(&mut ws, Some("alice")).await, ClientId::new("alice"));
}

#[tokio::test]
async fn test_handshake_assigns_client_id() {
    let server = start(builder()).await;
    let mut ws = connect(server.addr).await;

    let assigned = handshake(&mut ws, None).await;
    assert!(assigned.as_str().starts_with("client-"));
}

#[tokio::test]
async fn test_handshake_rejects_wrong_version() {
    let server = start(builder()).await;
    let mut ws = connect(server.addr).await;

    send(
        &mut ws,
        SystemMessage::Handshake {
            version: PROTOCOL_VERSION + 1,
            client_id: None,
        },
    )
    .await;

    assert_eq!(error_code(&recv(&mut ws).await), 400);
}

#[tokio::test]
async fn test_silent_socket_does_not_delay_other_clients() {
    let server = start(builder()).await;
    let _silent = tokio::net::TcpStream::connect(server.addr).await.unwrap();

    let joined = tokio::time::timeout(Duration::from_secs(1), client(server.addr, "alice")).await;

    assert!(joined.is_ok(), "a peer stuck before its upgrade must not block the listener");
}

#[tokio::test]
async fn test_heartbeat_is_acknowledged() {
    let server = start(builder()).await;
    let mut ws = client(server.addr, "alice").await;

    send(&mut ws, SystemMessage::Heartbeat { client_time: 1234 }).await;

    match recv(&mut ws).await {
        SystemMessage::HeartbeatAck { client_time, .. } => assert_eq!(client_time, 1234),
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

// =========================================================================
// Rooms
// =========================================================================

#[tokio::test]
async fn test_create_room_is_listed_with_merged_options() {
    let server = start(builder()).await;
    let mut ws = client(server.addr, "alice").await;

    let reply = create_room(&mut ws, "lobby", options(json!({"maxPlayers": 2}))).await;
    let SystemMessage::RoomCreated { room_id, .. } = reply else {
        panic!("expected RoomCreated, got {reply:?}");
    };

    let room = server.lifecycle.room(&room_id).expect("room should be tracked");
    assert_eq!(room.options()["maxPlayers"], 2);
    assert_eq!(room.owner(), &ClientId::new("alice"));

    send(&mut ws, SystemMessage::ListRooms { room_type: None }).await;
    match recv(&mut ws).await {
        SystemMessage::RoomList { rooms } => {
            assert_eq!(rooms.len(), 1);
            assert_eq!(rooms[0].id, room_id);
            assert_eq!(rooms[0].room_type, "lobby");
            assert_eq!(rooms[0].owner, ClientId::new("alice"));
        }
        other => panic!("expected RoomList, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_rooms_filters_by_type() {
    let server = start(builder()).await;
    let mut ws = client(server.addr, "alice").await;
    create_lobby(&mut ws).await;
    create_room(&mut ws, "leaky", RoomOptions::new()).await;

    send(
        &mut ws,
        SystemMessage::ListRooms {
            room_type: Some("leaky".into()),
        },
    )
    .await;

    match recv(&mut ws).await {
        SystemMessage::RoomList { rooms } => {
            assert_eq!(rooms.len(), 1);
            assert_eq!(rooms[0].room_type, "leaky");
        }
        other => panic!("expected RoomList, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_room_type_is_404() {
    let server = start(builder()).await;
    let mut ws = client(server.addr, "alice").await;

    let reply = create_room(&mut ws, "battle-royale", RoomOptions::new()).await;

    assert_eq!(error_code(&reply), 404);
    assert_eq!(server.lifecycle.room_count(), 0);
}

#[tokio::test]
async fn test_owner_disposes_room() {
    let server = start(builder()).await;
    let mut ws = client(server.addr, "alice").await;
    let room_id = create_lobby(&mut ws).await;

    send(&mut ws, SystemMessage::DisposeRoom { room_id: room_id.clone() }).await;

    assert_eq!(recv(&mut ws).await, SystemMessage::RoomDisposed { room_id: room_id.clone() });
    assert!(server.lifecycle.room(&room_id).is_none());
    assert!(server.lifecycle.directory().room_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_only_owner_may_dispose() {
    let server = start(builder()).await;
    let mut alice = client(server.addr, "alice").await;
    let mut mallory = client(server.addr, "mallory").await;
    let room_id = create_lobby(&mut alice).await;

    send(&mut mallory, SystemMessage::DisposeRoom { room_id: room_id.clone() }).await;

    assert_eq!(error_code(&recv(&mut mallory).await), 403);
    assert!(server.lifecycle.room(&room_id).is_some());
}

#[tokio::test]
async fn test_dispose_unknown_room_is_404() {
    let server = start(builder()).await;
    let mut ws = client(server.addr, "alice").await;

    send(
        &mut ws,
        SystemMessage::DisposeRoom {
            room_id: RoomId::new("nope"),
        },
    )
    .await;

    assert_eq!(error_code(&recv(&mut ws).await), 404);
}

#[tokio::test]
async fn test_rooms_outlive_their_creator_by_default() {
    let server = start(builder()).await;
    let mut ws = client(server.addr, "alice").await;
    let room_id = create_lobby(&mut ws).await;

    send(&mut ws, SystemMessage::Disconnect { reason: "bye".into() }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(server.lifecycle.room(&room_id).is_some());
}

#[tokio::test]
async fn test_rooms_disposed_with_creator_when_configured() {
    let server = start(builder().dispose_on_disconnect(true)).await;
    let mut ws = client(server.addr, "alice").await;
    let room_id = create_lobby(&mut ws).await;

    send(&mut ws, SystemMessage::Disconnect { reason: "bye".into() }).await;

    for _ in 0..50 {
        if server.lifecycle.room(&room_id).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room should be disposed after its creator left");
}

#[tokio::test]
async fn test_notices_do_not_extend_idle_timeout() {
    let idle = Duration::from_millis(500);
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        idle_timeout: idle,
        ..ServerConfig::default()
    };
    let server = start(builder().config(config)).await;
    let mut ws = client(server.addr, "alice").await;
    let room_id = create_lobby(&mut ws).await;
    let last_sent = Instant::now();

    // a notice the client didn't ask for, well inside the idle window
    tokio::time::sleep(Duration::from_millis(300)).await;
    server.lifecycle.dispose_room(&room_id).await.unwrap();
    assert_eq!(recv(&mut ws).await, SystemMessage::RoomDisposed { room_id });

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "idle connection should be closed");
    assert!(
        last_sent.elapsed() < idle + Duration::from_millis(200),
        "idle clock restarted by a server notice: closed after {:?}",
        last_sent.elapsed()
    );
}

#[tokio::test]
async fn test_servers_sharing_a_store_see_each_others_rooms() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let bus: Arc<dyn PubSub> = Arc::new(MemoryPubSub::new());
    let a = start(builder().store(Arc::clone(&store)).pubsub(Arc::clone(&bus))).await;
    let b = start(builder().store(store).pubsub(bus)).await;

    let mut on_a = client(a.addr, "alice").await;
    let room_id = create_lobby(&mut on_a).await;

    let mut on_b = client(b.addr, "bob").await;
    send(&mut on_b, SystemMessage::ListRooms { room_type: None }).await;
    match recv(&mut on_b).await {
        SystemMessage::RoomList { rooms } => {
            assert_eq!(rooms.iter().map(|r| r.id.clone()).collect::<Vec<_>>(), vec![room_id.clone()]);
        }
        other => panic!("expected RoomList, got {other:?}"),
    }

    // b doesn't own it, so b can't dispose it
    send(&mut on_b, SystemMessage::DisposeRoom { room_id }).await;
    assert_eq!(error_code(&recv(&mut on_b).await), 404);
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_shutdown_with_no_rooms() {
    let server = start(builder()).await;

    server.stop.send(()).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(1), server.task)
        .await
        .expect("shutdown should be quick")
        .unwrap()
        .expect("requested shutdown is not an error");

    assert_eq!(report.total(), 0);
    assert_eq!(server.lifecycle.phase(), Phase::Terminated);
}

#[tokio::test]
async fn test_shutdown_disposes_rooms_and_says_goodbye() {
    let store = MemoryStore::new();
    let server = start(builder().store(Arc::new(store.clone()))).await;
    let mut ws = client(server.addr, "alice").await;
    let first = create_lobby(&mut ws).await;
    let second = create_lobby(&mut ws).await;

    server.stop.send(()).unwrap();

    let mut disposed = Vec::new();
    loop {
        match recv(&mut ws).await {
            SystemMessage::RoomDisposed { room_id } => disposed.push(room_id),
            SystemMessage::Disconnect { reason } => {
                assert!(reason.contains("shutting down"));
                break;
            }
            other => panic!("unexpected message during shutdown: {other:?}"),
        }
    }
    disposed.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(disposed, expected);

    let report = server.task.await.unwrap().unwrap();
    assert_eq!(report.disposed.len(), 2);
    assert!(report.is_clean());

    assert!(!store.keys().await.iter().any(|k| k.starts_with("blueboat:room:")));
    assert!(
        tokio::net::TcpStream::connect(server.addr).await.is_err(),
        "listener should be closed"
    );
}

#[tokio::test]
async fn test_shutdown_survives_a_failing_room() {
    let server = start(builder()).await;
    let mut ws = client(server.addr, "alice").await;
    create_lobby(&mut ws).await;
    create_room(&mut ws, "leaky", RoomOptions::new()).await;
    create_lobby(&mut ws).await;

    server.stop.send(()).unwrap();
    let report = server.task.await.unwrap().expect("room failures are not fatal");

    assert_eq!(report.disposed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(server.lifecycle.room_count(), 0);
}

#[tokio::test]
async fn test_fatal_trigger_drains_rooms_then_fails() {
    let store = MemoryStore::new();
    let server = start_with(
        builder().store(Arc::new(store.clone())),
        ShutdownTrigger::Fatal("store connection lost".into()),
    )
    .await;
    let mut ws = client(server.addr, "alice").await;
    let room_id = create_lobby(&mut ws).await;

    server.stop.send(()).unwrap();

    assert_eq!(recv(&mut ws).await, SystemMessage::RoomDisposed { room_id });
    assert!(matches!(recv(&mut ws).await, SystemMessage::Disconnect { .. }));

    let result = tokio::time::timeout(Duration::from_secs(2), server.task)
        .await
        .expect("fatal shutdown should still finish")
        .unwrap();
    assert!(matches!(result, Err(ServerError::Fatal(reason)) if reason.contains("store connection lost")));

    assert_eq!(server.lifecycle.phase(), Phase::Terminated);
    assert_eq!(server.lifecycle.room_count(), 0);
    assert!(server.lifecycle.directory().room_ids().await.unwrap().is_empty());
    assert!(!store.keys().await.iter().any(|k| k.starts_with("blueboat:room:")));
    assert!(
        tokio::net::TcpStream::connect(server.addr).await.is_err(),
        "listener should be closed"
    );
}

#[tokio::test]
async fn test_no_rooms_after_shutdown_starts() {
    let server = start(builder()).await;
    server.lifecycle.shutdown(ShutdownTrigger::Requested).await;

    let mut ws = client(server.addr, "alice").await;
    let reply = create_room(&mut ws, "lobby", RoomOptions::new()).await;

    assert_eq!(error_code(&reply), 503);
}
