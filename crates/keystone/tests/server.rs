//! Integration tests for the Keystone server over real TCP sockets.

use std::time::Duration;

use keystone::prelude::*;
use keystone::protocol::codec;
use keystone::protocol::packets::handshake_schema;
use keystone::protocol::{HandshakePayload, SchemaRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

// =========================================================================
// Fixtures
// =========================================================================

const LOGIN: u8 = 0x6F;
const LOGIN_OK: u8 = 0x96;
const CHAT: u8 = 0x20;

fn login_schema() -> PacketSchema {
    PacketSchema::builder("login", LOGIN, Direction::Incoming)
        .sequenced()
        .field("account", FieldKind::u32())
        .build()
        .unwrap()
}

fn login_ok_schema() -> PacketSchema {
    PacketSchema::builder("login_ok", LOGIN_OK, Direction::Outgoing)
        .field("account", FieldKind::u32())
        .build()
        .unwrap()
}

fn chat_schema() -> PacketSchema {
    PacketSchema::builder("chat", CHAT, Direction::Incoming)
        .sequenced()
        .dynamic_size()
        .field("text", FieldKind::Tail)
        .build()
        .unwrap()
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new().on(LOGIN, |packet, ctx| {
        let account = packet
            .uint(0)
            .ok_or_else(|| KeystoneError::Handler("missing account".into()))?;
        ctx.bind_account(AccountId(account))?;
        ctx.send(Packet::new(LOGIN_OK, vec![(account as u32).into()]))
    })
}

async fn start(config: ServerConfig) -> (std::net::SocketAddr, KeystoneServer) {
    let server = KeystoneServer::builder()
        .config(config)
        .bind("127.0.0.1:0")
        .packet(login_schema())
        .packet(login_ok_schema())
        .packet(chat_schema())
        .dispatcher(dispatcher())
        .build()
        .await
        .unwrap();
    (server.local_addr().unwrap(), server)
}

fn config() -> ServerConfig {
    ServerConfig {
        handshake_sync_window_ms: 60_000,
        ..ServerConfig::default()
    }
}

async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for server bytes")
        .unwrap();
    buf
}

/// Connects and completes the handshake. Returns the stream ready for
/// sequenced traffic starting at counter 0.
async fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(read_n(&mut stream, 2).await, [0xFD, Phase::Handshake.as_u8()]);

    let challenge = read_n(&mut stream, 13).await;
    assert_eq!(challenge[0], 0xFF);
    let decoded = codec::decode(&challenge, &handshake_schema()).unwrap();
    let payload = HandshakePayload::from_packet(&decoded.packet).unwrap();
    let echo = codec::encode_to_vec(&payload.to_packet(), &handshake_schema()).unwrap();
    stream.write_all(&echo).await.unwrap();

    assert_eq!(read_n(&mut stream, 2).await, [0xFD, Phase::Login.as_u8()]);
    stream
}

async fn expect_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timed out waiting for close");
    match read {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("expected close, got {n} bytes"),
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_build_rejects_duplicate_schema() {
    let result = KeystoneServer::builder()
        .bind("127.0.0.1:0")
        .packet(login_schema())
        .packet(login_schema())
        .build()
        .await;
    assert!(matches!(result, Err(KeystoneError::Protocol(_))));
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let result = KeystoneServer::builder()
        .config(ServerConfig {
            max_packet_size: 1,
            ..ServerConfig::default()
        })
        .bind("127.0.0.1:0")
        .build()
        .await;
    assert!(matches!(result, Err(KeystoneError::Config(_))));
}

#[tokio::test]
async fn test_build_with_explicit_registry() {
    let schemas = SchemaRegistry::with_builtin().with(login_schema()).unwrap();
    let server = KeystoneServer::builder()
        .bind("127.0.0.1:0")
        .schemas(schemas)
        .build()
        .await
        .unwrap();
    assert_eq!(server.config().bind_addr, "127.0.0.1:0");
}

#[tokio::test]
async fn test_login_binds_account_and_replies() {
    let (addr, server) = start(config()).await;
    let sessions = server.sessions();
    tokio::spawn(server.run());

    let mut client = connect(addr).await;
    client.write_all(&[LOGIN, 0x00, 0, 0, 0, 7]).await.unwrap();
    assert_eq!(read_n(&mut client, 5).await, [LOGIN_OK, 0, 0, 0, 7]);

    let session = sessions.get_by_account_id(AccountId(7)).unwrap();
    assert_eq!(session.phase(), Phase::Login);

    // Second sequenced packet uses counter 1.
    client
        .write_all(&[CHAT, 0x01, 0x00, 0x02, b'h', b'i'])
        .await
        .unwrap();

    assert!(sessions.close_by_account_id(AccountId(7)));
    expect_eof(&mut client).await;
}

#[tokio::test]
async fn test_duplicate_login_evicts_previous_connection() {
    let (addr, server) = start(config()).await;
    let sessions = server.sessions();
    tokio::spawn(server.run());

    let mut first = connect(addr).await;
    first.write_all(&[LOGIN, 0x00, 0, 0, 0, 3]).await.unwrap();
    read_n(&mut first, 5).await;

    let mut second = connect(addr).await;
    second.write_all(&[LOGIN, 0x00, 0, 0, 0, 3]).await.unwrap();
    assert_eq!(read_n(&mut second, 5).await, [LOGIN_OK, 0, 0, 0, 3]);

    expect_eof(&mut first).await;
    let owner = sessions.get_by_account_id(AccountId(3)).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions.session_ids(), vec![owner.id()]);
}

#[tokio::test]
async fn test_packet_before_handshake_closes_connection() {
    let (addr, server) = start(config()).await;
    tokio::spawn(server.run());

    let mut client = TcpStream::connect(addr).await.unwrap();
    read_n(&mut client, 15).await;
    client.write_all(&[LOGIN, 0x00, 0, 0, 0, 1]).await.unwrap();
    expect_eof(&mut client).await;
}

#[tokio::test]
async fn test_wrong_sequence_closes_connection() {
    let (addr, server) = start(config()).await;
    tokio::spawn(server.run());

    let mut client = connect(addr).await;
    client.write_all(&[LOGIN, 0x03, 0, 0, 0, 1]).await.unwrap();
    expect_eof(&mut client).await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let (addr, server) = start(ServerConfig {
        max_packet_size: 16,
        ..config()
    })
    .await;
    tokio::spawn(server.run());

    let mut client = connect(addr).await;
    // Declared body length 0x0100 is far past the 16-byte limit.
    client.write_all(&[CHAT, 0x00, 0x01, 0x00]).await.unwrap();
    expect_eof(&mut client).await;
}

#[tokio::test]
async fn test_unknown_header_is_ignored_by_default() {
    let (addr, server) = start(config()).await;
    tokio::spawn(server.run());

    let mut client = connect(addr).await;
    client.write_all(&[0x77, 1, 2, 3]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Still alive: a valid login goes through with counter 0.
    client.write_all(&[LOGIN, 0x00, 0, 0, 0, 9]).await.unwrap();
    assert_eq!(read_n(&mut client, 5).await, [LOGIN_OK, 0, 0, 0, 9]);
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let (addr, server) = start(config()).await;
    let sessions = server.sessions();
    let shutdown = server.shutdown_token();
    let running = tokio::spawn(server.run());

    let mut client = connect(addr).await;
    assert_eq!(sessions.len(), 1);

    shutdown.cancel();
    timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    expect_eof(&mut client).await;
}
