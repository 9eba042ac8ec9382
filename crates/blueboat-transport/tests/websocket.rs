//! Integration tests for the WebSocket transport against a real
//! tokio-tungstenite client.

#[cfg(feature = "websocket")]
mod websocket {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use blueboat_transport::{Connection, Incoming, Transport, TransportError, WebSocketTransport};
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect_client(addr: SocketAddr) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        ws
    }

    /// Binds on an OS-assigned port and accepts one client.
    async fn accept_one() -> (WebSocketTransport, blueboat_transport::WebSocketConnection, Client) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0").await.expect("should bind");
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(connect_client(addr));
        let incoming = transport.accept().await.expect("should accept");
        let conn = incoming.upgrade().await.expect("should upgrade");
        let client = client.await.unwrap();
        (transport, conn, client)
    }

    #[tokio::test]
    async fn test_bind_reports_assigned_port() {
        let transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(transport.is_listening());
    }

    #[tokio::test]
    async fn test_send_and_receive_both_ways() {
        let (_transport, conn, mut client) = accept_one().await;
        assert!(conn.id().into_inner() > 0);

        conn.send(b"hello from server").await.unwrap();
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"hello from server");

        client
            .send(Message::Text("hello from client".into()))
            .await
            .unwrap();
        let received = conn.recv().await.unwrap().expect("should have data");
        assert_eq!(received, b"hello from client");

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_while_receive_is_pending() {
        let (_transport, conn, mut client) = accept_one().await;
        let conn = Arc::new(conn);

        let reader = Arc::clone(&conn);
        let pending = tokio::spawn(async move { reader.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), conn.send(b"notice"))
            .await
            .expect("send must not wait for the pending recv")
            .unwrap();
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"notice");

        client.send(Message::Close(None)).await.unwrap();
        assert!(pending.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_client_close() {
        let (_transport, conn, mut client) = accept_one().await;

        client.send(Message::Close(None)).await.unwrap();

        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        transport.shutdown().await.unwrap();

        assert!(!transport.is_listening());
        assert!(matches!(transport.accept().await, Err(TransportError::Shutdown)));
        assert!(
            tokio::net::TcpStream::connect(addr).await.is_err(),
            "listener socket should be closed"
        );
        // shutting down again is harmless
        transport.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_plain_tcp_peer_fails_upgrade() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        let peer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"not http\r\n\r\n").await.unwrap();
            stream
        });

        let incoming = transport.accept().await.expect("TCP accept should succeed");
        let err = incoming.upgrade().await.err().expect("upgrade should fail");
        assert!(matches!(err, TransportError::HandshakeFailed(_)));
        assert!(!err.is_fatal());
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn test_silent_peer_does_not_hold_up_the_next_client() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        // connects but never sends its upgrade request
        let silent = tokio::net::TcpStream::connect(addr).await.unwrap();
        let stalled = transport.accept().await.expect("should accept the silent peer");
        assert_eq!(stalled.peer_addr(), silent.local_addr().unwrap());

        let client = tokio::spawn(connect_client(addr));
        let conn = tokio::time::timeout(Duration::from_secs(1), async {
            let incoming = transport.accept().await.expect("should accept");
            incoming.upgrade().await.expect("should upgrade")
        })
        .await
        .expect("a stalled upgrade must not block the next client");
        let mut client = client.await.unwrap();

        conn.send(b"welcome").await.unwrap();
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"welcome");
        drop(stalled);
    }
}
