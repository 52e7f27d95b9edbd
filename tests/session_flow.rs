//! End-to-end session tests against a scripted in-memory server

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use chatango_client::frame::{FrameReader, FrameWriter};
use chatango_client::{
    AuthError, BoxedStream, ConnectionState, Connector, ErrorCode, HandshakeError, Identity,
    Room, RoomConfig, RoomError, RoomEvent,
};
use chatango_client::error::HandshakeStep;

const WAIT: Duration = Duration::from_secs(2);

/// Hands the server end of every new connection to the test
struct Duplexer {
    accepted: mpsc::UnboundedSender<DuplexStream>,
    /// Time a connect spends "on the network" before it completes
    latency: Duration,
}

#[async_trait]
impl Connector for Duplexer {
    async fn connect(&self, host: &str, _port: u16) -> io::Result<BoxedStream> {
        assert_eq!(host, "s62.chatango.com");
        tokio::time::sleep(self.latency).await;
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.accepted
            .send(server)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "test over"))?;
        Ok(Box::new(client))
    }
}

struct FakeServer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
}

impl FakeServer {
    async fn accept(incoming: &mut mpsc::UnboundedReceiver<DuplexStream>) -> Self {
        let stream = timeout(WAIT, incoming.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped");
        let (r, w) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(r),
            writer: FrameWriter::new(w),
        }
    }

    /// Next non-keepalive frame from the client
    async fn recv(&mut self) -> Option<String> {
        loop {
            let frame = timeout(WAIT, self.reader.read_frame())
                .await
                .expect("client went quiet")
                .expect("read failed")?;
            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }

    async fn expect(&mut self, prefix: &str) -> String {
        let frame = self.recv().await.expect("client closed");
        assert!(
            frame.starts_with(prefix),
            "expected {:?}, got {:?}",
            prefix,
            frame
        );
        frame
    }

    async fn send(&mut self, frame: &str) {
        self.writer.write_frame(frame).await.expect("write failed");
    }
}

fn config() -> RoomConfig {
    RoomConfig::default()
        .with_handshake_timeout(Duration::from_millis(500))
        .with_connect_timeout(Duration::from_millis(500))
        .with_disconnect_timeout(Duration::from_millis(200))
        .with_reconnect_delay(Duration::from_millis(50))
        .with_keepalive_interval(Duration::from_secs(60))
}

type Setup = (
    Arc<Room>,
    mpsc::Receiver<RoomEvent>,
    mpsc::UnboundedReceiver<DuplexStream>,
);

fn setup(identity: Arc<Identity>, config: RoomConfig) -> Setup {
    setup_with_latency(identity, config, Duration::ZERO)
}

fn setup_with_latency(identity: Arc<Identity>, config: RoomConfig, latency: Duration) -> Setup {
    let (accepted, incoming) = mpsc::unbounded_channel();
    let connector = Arc::new(Duplexer { accepted, latency });
    let (room, events) =
        Room::with_connector("khouwe", identity, config, connector).expect("room");
    (Arc::new(room), events, incoming)
}

fn spawn_connect(room: &Arc<Room>) -> tokio::task::JoinHandle<Result<(), RoomError>> {
    let room = Arc::clone(room);
    tokio::spawn(async move { room.connect().await })
}

async fn next_event(events: &mut mpsc::Receiver<RoomEvent>) -> RoomEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("no event")
        .expect("event channel closed")
}

/// Anonymous join: no login step
async fn serve_anonymous_join(server: &mut FakeServer) {
    server.expect("bauth:khouwe:").await;
    server
        .send("ok:owner1:14396270:N::1700003953.21:1.2.3.4::server9")
        .await;
    server.send("inited").await;
    server.expect("gparticipants").await;
    server.send("gparticipants:0:").await;
}

#[tokio::test]
async fn test_temporary_name_session() {
    let (room, mut events, mut incoming) = setup(Identity::temporary("visitor"), config());
    let joining = {
        let room = Arc::clone(&room);
        tokio::spawn(async move { room.connect().await })
    };

    let mut server = FakeServer::accept(&mut incoming).await;
    let bauth = server.expect("bauth:khouwe:").await;
    assert!(bauth.ends_with("::"));

    server
        .send("ok:owner1:sess123:N:visitor:169900:1.2.3.4::server9")
        .await;
    server.send("inited").await;
    assert_eq!(server.expect("blogin:").await, "blogin:visitor");

    let state = room.state();
    assert_eq!(state.connection_state, ConnectionState::Authenticating);
    assert_eq!(state.owner, "owner1");
    assert_eq!(state.session_id, "sess123");
    assert_eq!(state.server_time, 169900.0);

    server.send("aliasok").await;
    server.expect("gparticipants").await;
    server
        .send("gparticipants:1:c1:1699.5:111:bob:None:0")
        .await;

    timeout(WAIT, joining)
        .await
        .expect("connect hung")
        .expect("task panicked")
        .expect("connect failed");
    assert!(room.is_ready());
    assert!(matches!(next_event(&mut events).await, RoomEvent::Connect));
    assert_eq!(room.members().len(), 1);

    room.send_message("hi & bye").expect("send");
    let frame = server.expect("bm:").await;
    assert!(frame.ends_with(":0:hi &amp; bye"), "got {:?}", frame);

    // Id frame before content frame
    server.send("u:p1:f1").await;
    server
        .send("b:1699000000.5::visitor:sess123:U1:p1:1.2.3.4:0::hi &amp; bye")
        .await;
    let message = match next_event(&mut events).await {
        RoomEvent::Message { message } => message,
        other => panic!("Wrong event: {:?}", other),
    };
    assert_eq!(message.body, "hi & bye");
    assert_eq!(message.final_id.as_deref(), Some("f1"));
    assert_eq!(message.identity.name(), "visitor");
    assert!(room.message("f1").is_some());

    room.delete_message("f1").expect("delete");
    assert_eq!(server.expect("delmsg:").await, "delmsg:f1");
    room.ban(&message).expect("ban");
    assert_eq!(server.expect("block:").await, "block:U1:1.2.3.4:visitor");

    server.send("participant:1:c2:222:carol:None::1699.7").await;
    match next_event(&mut events).await {
        RoomEvent::Join { identity } => assert_eq!(identity.name(), "carol"),
        other => panic!("Wrong event: {:?}", other),
    }

    room.disconnect().await;
    assert_eq!(room.connection_state(), ConnectionState::Idle);
    assert!(matches!(next_event(&mut events).await, RoomEvent::Disconnect));
    assert_eq!(server.recv().await, None);
}

#[tokio::test]
async fn test_bad_login_is_fatal() {
    let (room, mut events, mut incoming) = setup(Identity::registered("bob", "wrong"), config());
    let joining = {
        let room = Arc::clone(&room);
        tokio::spawn(async move { room.connect().await })
    };

    let mut server = FakeServer::accept(&mut incoming).await;
    server.expect("bauth:").await;
    server.send("ok:owner1:sess1:N:bob:169900:1.2.3.4::server9").await;
    server.send("inited").await;
    assert_eq!(server.expect("blogin:").await, "blogin:bob:wrong");
    server.send("badlogin").await;

    let result = timeout(WAIT, joining).await.expect("connect hung").expect("task panicked");
    assert!(matches!(result, Err(RoomError::Auth(AuthError::BadLogin))));
    assert_eq!(room.connection_state(), ConnectionState::Idle);
    match next_event(&mut events).await {
        RoomEvent::Error { code, .. } => assert_eq!(code, ErrorCode::LoginRejected),
        other => panic!("Wrong event: {:?}", other),
    }

    // No retry after a rejected login
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(incoming.try_recv().is_err());
}

#[tokio::test]
async fn test_anonymous_reconnects_after_close() {
    let (room, mut events, mut incoming) = setup(Identity::anonymous(), config());
    let joining = {
        let room = Arc::clone(&room);
        tokio::spawn(async move { room.connect().await })
    };

    let mut server = FakeServer::accept(&mut incoming).await;
    serve_anonymous_join(&mut server).await;
    timeout(WAIT, joining)
        .await
        .expect("connect hung")
        .expect("task panicked")
        .expect("connect failed");
    assert!(matches!(next_event(&mut events).await, RoomEvent::Connect));
    assert_eq!(room.identity().name(), "anon9123");

    room.send_message("hello").expect("send");
    let frame = server.expect("bm:").await;
    assert!(frame.ends_with(":0:<n3953/>hello"), "got {:?}", frame);

    drop(server);
    assert!(matches!(next_event(&mut events).await, RoomEvent::Disconnect));

    let mut server = FakeServer::accept(&mut incoming).await;
    serve_anonymous_join(&mut server).await;
    assert!(matches!(next_event(&mut events).await, RoomEvent::Connect));
    assert!(room.is_ready());

    room.disconnect().await;
}

#[tokio::test]
async fn test_handshake_timeout_without_reconnect() {
    let (room, mut events, mut incoming) =
        setup(Identity::anonymous(), config().with_auto_reconnect(false));
    let joining = {
        let room = Arc::clone(&room);
        tokio::spawn(async move { room.connect().await })
    };

    let mut server = FakeServer::accept(&mut incoming).await;
    server.expect("bauth:").await;

    let result = timeout(WAIT, joining).await.expect("connect hung").expect("task panicked");
    assert!(matches!(
        result,
        Err(RoomError::Handshake(HandshakeError::Timeout(HandshakeStep::Join)))
    ));
    assert_eq!(room.connection_state(), ConnectionState::Idle);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_handshake_timeout_is_retried() {
    let (room, mut events, mut incoming) = setup(Identity::anonymous(), config());
    let joining = {
        let room = Arc::clone(&room);
        tokio::spawn(async move { room.connect().await })
    };

    let mut silent = FakeServer::accept(&mut incoming).await;
    silent.expect("bauth:").await;

    let mut server = FakeServer::accept(&mut incoming).await;
    serve_anonymous_join(&mut server).await;
    timeout(WAIT, joining)
        .await
        .expect("connect hung")
        .expect("task panicked")
        .expect("connect failed");
    assert!(matches!(next_event(&mut events).await, RoomEvent::Connect));

    room.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_cancels_connect() {
    let (room, _events, mut incoming) = setup(Identity::anonymous(), config());
    let joining = {
        let room = Arc::clone(&room);
        tokio::spawn(async move { room.connect().await })
    };

    let mut server = FakeServer::accept(&mut incoming).await;
    server.expect("bauth:").await;
    room.disconnect().await;

    let result = timeout(WAIT, joining).await.expect("connect hung").expect("task panicked");
    assert!(matches!(result, Err(RoomError::Cancelled)));
    assert_eq!(room.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_second_connect_is_rejected() {
    let (room, _events, mut incoming) = setup(Identity::anonymous(), config());
    let joining = {
        let room = Arc::clone(&room);
        tokio::spawn(async move { room.connect().await })
    };

    let mut server = FakeServer::accept(&mut incoming).await;
    server.expect("bauth:").await;
    assert!(matches!(room.connect().await, Err(RoomError::AlreadyConnecting)));

    serve_after_bauth(&mut server).await;
    timeout(WAIT, joining)
        .await
        .expect("connect hung")
        .expect("task panicked")
        .expect("connect failed");
    room.disconnect().await;
}

async fn serve_after_bauth(server: &mut FakeServer) {
    server
        .send("ok:owner1:14396270:N::1700003953.21:1.2.3.4::server9")
        .await;
    server.send("inited").await;
    server.expect("gparticipants").await;
    server.send("gparticipants:0:").await;
}

#[tokio::test]
async fn test_disconnect_interrupts_tcp_connect() {
    let (room, mut events, mut incoming) = setup_with_latency(
        Identity::anonymous(),
        config().with_connect_timeout(Duration::from_secs(5)),
        Duration::from_millis(400),
    );
    let joining = spawn_connect(&room);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(room.connection_state(), ConnectionState::Connecting);
    room.disconnect().await;

    let result = timeout(Duration::from_millis(200), joining)
        .await
        .expect("connect kept waiting on the network")
        .expect("task panicked");
    assert!(matches!(result, Err(RoomError::Cancelled)));
    assert_eq!(room.connection_state(), ConnectionState::Idle);

    // The abandoned connect never completes and nothing is retried
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(incoming.try_recv().is_err());
    assert!(events.try_recv().is_err());
    assert_eq!(room.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_disconnect_during_retry_delay() {
    let (room, _events, mut incoming) = setup(
        Identity::anonymous(),
        config()
            .with_handshake_timeout(Duration::from_millis(100))
            .with_reconnect_delay(Duration::from_secs(5)),
    );
    let joining = spawn_connect(&room);

    let mut silent = FakeServer::accept(&mut incoming).await;
    silent.expect("bauth:").await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(room.connection_state(), ConnectionState::Reconnecting);

    room.disconnect().await;
    let result = timeout(Duration::from_millis(200), joining)
        .await
        .expect("connect kept sleeping")
        .expect("task panicked");
    assert!(matches!(result, Err(RoomError::Cancelled)));
    assert_eq!(room.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_manual_connect_replaces_scheduled_reconnect() {
    let (room, mut events, mut incoming) = setup(
        Identity::anonymous(),
        config().with_reconnect_delay(Duration::from_millis(300)),
    );
    let joining = spawn_connect(&room);
    let mut server = FakeServer::accept(&mut incoming).await;
    serve_anonymous_join(&mut server).await;
    timeout(WAIT, joining)
        .await
        .expect("connect hung")
        .expect("task panicked")
        .expect("connect failed");
    assert!(matches!(next_event(&mut events).await, RoomEvent::Connect));

    drop(server);
    assert!(matches!(next_event(&mut events).await, RoomEvent::Disconnect));
    assert_eq!(room.connection_state(), ConnectionState::Reconnecting);

    // Reconnect by hand before the scheduled one is due
    let joining = spawn_connect(&room);
    let mut server = FakeServer::accept(&mut incoming).await;
    serve_anonymous_join(&mut server).await;
    timeout(WAIT, joining)
        .await
        .expect("connect hung")
        .expect("task panicked")
        .expect("connect failed");
    assert!(matches!(next_event(&mut events).await, RoomEvent::Connect));

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(incoming.try_recv().is_err(), "stale reconnect opened a second connection");
    assert!(room.is_ready());
    assert!(events.try_recv().is_err());

    room.send_message("still here").expect("send");
    server.expect("bm:").await;
    room.disconnect().await;
}

#[tokio::test]
async fn test_message_burst_is_delivered_in_order() {
    const BURST: usize = 400;
    let (room, mut events, mut incoming) = setup(Identity::anonymous(), config());
    let joining = spawn_connect(&room);
    let mut server = FakeServer::accept(&mut incoming).await;
    serve_anonymous_join(&mut server).await;
    timeout(WAIT, joining)
        .await
        .expect("connect hung")
        .expect("task panicked")
        .expect("connect failed");
    assert!(matches!(next_event(&mut events).await, RoomEvent::Connect));

    // More messages than the event channel holds, sent before any is read
    for i in 0..BURST {
        server
            .send(&format!("b:1699000000.5:bob::111:U1:p{}:1.2.3.4:0::m{}", i, i))
            .await;
        server.send(&format!("u:p{}:f{}", i, i)).await;
    }

    for i in 0..BURST {
        match next_event(&mut events).await {
            RoomEvent::Message { message } => {
                assert_eq!(message.body, format!("m{}", i));
                assert_eq!(message.final_id, Some(format!("f{}", i)));
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }
    assert!(room.is_ready());

    room.disconnect().await;
    assert!(matches!(next_event(&mut events).await, RoomEvent::Disconnect));
}

#[tokio::test]
async fn test_moderator_lookup() {
    let (room, mut events, mut incoming) = setup(Identity::anonymous(), config());
    let joining = spawn_connect(&room);
    let mut server = FakeServer::accept(&mut incoming).await;
    server.expect("bauth:khouwe:").await;
    server
        .send("ok:Owner1:14396270:N::1700003953.21:1.2.3.4:Alice,82368:server9")
        .await;
    server.send("inited").await;
    server.expect("gparticipants").await;
    server.send("gparticipants:0:").await;
    timeout(WAIT, joining)
        .await
        .expect("connect hung")
        .expect("task panicked")
        .expect("connect failed");
    assert!(matches!(next_event(&mut events).await, RoomEvent::Connect));

    assert!(room.is_moderator("owner1"));
    assert!(room.is_moderator("ALICE"));
    assert!(!room.is_moderator("bob"));

    server.send("mods:bob,82368").await;
    assert!(matches!(next_event(&mut events).await, RoomEvent::ModUpdate { .. }));
    assert!(room.is_moderator("Bob"));
    assert!(!room.is_moderator("alice"));

    room.disconnect().await;
}
