//! End-to-end protocol tests.
//!
//! Each test starts its own server on an ephemeral loopback port and talks
//! to it with raw frames over real TCP sockets.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use roomchat::codec::{self, Frame, DEFAULT_MAX_PAYLOAD};
use roomchat::{serve, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

const JOIN: u8 = 0x03;
const LEAVE: u8 = 0x06;
const LIST_ROOMS: u8 = 0x09;
const LIST_USERS: u8 = 0x0c;
const NICK: u8 = 0x0f;
const MESSAGE: u8 = 0x12;
const HEARTBEAT: u8 = 0x13;
const NO_COMMAND: u8 = 0x15;
const RESPONSE: u8 = 0x9a;
const SORTING_HAT: u8 = 0x9b;

const WAIT: Duration = Duration::from_secs(5);

/// Start a server and return its address plus the handle that keeps it alive.
async fn start_server() -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(serve(listener, ServerConfig::default(), async move {
        let _ = shutdown_rx.await;
    }));

    (addr, shutdown_tx)
}

fn str8(s: &str) -> Vec<u8> {
    let mut out = vec![s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

fn join_payload(room: &str, password: &str) -> Vec<u8> {
    let mut out = str8(room);
    out.extend(str8(password));
    out
}

fn message_payload(target: &str, body: &[u8]) -> Vec<u8> {
    let mut out = str8(target);
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    async fn send(&mut self, opcode: u8, payload: &[u8]) {
        self.stream
            .write_all(&codec::encode(opcode, payload))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Frame {
        timeout(WAIT, async {
            loop {
                if let Some(frame) = codec::try_extract(&mut self.buf, DEFAULT_MAX_PAYLOAD).unwrap() {
                    return frame;
                }
                let n = self.stream.read_buf(&mut self.buf).await.unwrap();
                assert!(n > 0, "server closed the connection");
            }
        })
        .await
        .expect("timed out waiting for a frame")
    }

    /// Send a request and return the generic response payload
    async fn request(&mut self, opcode: u8, payload: &[u8]) -> Vec<u8> {
        self.send(opcode, payload).await;
        let frame = self.recv().await;
        assert_eq!(frame.opcode, RESPONSE);
        frame.payload.to_vec()
    }

    async fn sorting_hat(&mut self) -> String {
        let reply = self.request(SORTING_HAT, b"").await;
        assert_eq!(reply[0], 0x00);
        String::from_utf8(reply[1..].to_vec()).unwrap()
    }

    /// Read until the server closes the socket, discarding any frames
    async fn expect_closed(&mut self) {
        timeout(WAIT, async {
            loop {
                match self.stream.read_buf(&mut self.buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => continue,
                }
            }
        })
        .await
        .expect("server kept the connection open");
    }
}

fn names(reply: &[u8]) -> Vec<String> {
    assert_eq!(reply[0], 0x00);
    let mut out = Vec::new();
    let mut rest = &reply[1..];
    while let Some((&len, tail)) = rest.split_first() {
        let (name, tail) = tail.split_at(len as usize);
        out.push(String::from_utf8(name.to_vec()).unwrap());
        rest = tail;
    }
    out
}

#[tokio::test]
async fn test_sorting_hat_assigns_first_handles() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;

    a.send(SORTING_HAT, b"").await;
    let frame = a.recv().await;
    assert_eq!(frame.opcode, RESPONSE);
    assert_eq!(&frame.payload[..], b"\x00rand0");

    assert_eq!(b.sorting_hat().await, "rand1");
}

#[tokio::test]
async fn test_join_with_wrong_password_rejected() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;

    assert_eq!(a.request(JOIN, &join_payload("gryffindor", "lion")).await, vec![0x00]);

    let reply = b.request(JOIN, &join_payload("gryffindor", "wrong")).await;
    assert_eq!(reply[0], 0x01);

    // B is still in no room
    let reply = b.request(NO_COMMAND, b"").await;
    assert_eq!(reply[0], 0x01);
    let reply = a.request(NO_COMMAND, b"").await;
    assert_eq!(reply, vec![0x00]);
}

#[tokio::test]
async fn test_message_to_missing_target() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;
    a.sorting_hat().await;
    b.sorting_hat().await;

    let reply = a.request(MESSAGE, &message_payload("Voldemort", b"hello?")).await;
    assert_eq!(reply[0], 0x01);

    // The first thing B sees is its own reply, nothing was relayed
    assert_eq!(names(&b.request(LIST_ROOMS, b"").await), Vec::<String>::new());
}

#[tokio::test]
async fn test_message_delivered() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;
    a.sorting_hat().await;
    assert_eq!(b.request(NICK, &str8("Ron")).await, vec![0x00]);

    assert_eq!(
        a.request(MESSAGE, &message_payload("Ron", b"hello")).await,
        vec![0x00]
    );

    let delivered = b.recv().await;
    assert_eq!(delivered.opcode, MESSAGE);
    assert_eq!(&delivered.payload[..], b"\x05rand0\x00\x05hello");
}

#[tokio::test]
async fn test_rename_recycles_default_handle() {
    let (addr, _shutdown) = start_server().await;
    let mut clients = Vec::new();
    for expected in ["rand0", "rand1", "rand2", "rand3"] {
        let mut client = TestClient::connect(addr).await;
        assert_eq!(client.sorting_hat().await, expected);
        clients.push(client);
    }

    assert_eq!(clients[3].request(NICK, &str8("Hermione")).await, vec![0x00]);

    let mut e = TestClient::connect(addr).await;
    assert_eq!(e.sorting_hat().await, "rand3");
    let mut f = TestClient::connect(addr).await;
    assert_eq!(f.sorting_hat().await, "rand4");
}

#[tokio::test]
async fn test_duplicate_nick_rejected() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;

    assert_eq!(a.request(NICK, &str8("Harry")).await, vec![0x00]);
    assert_eq!(b.request(NICK, &str8("Harry")).await[0], 0x01);
    assert_eq!(names(&b.request(LIST_USERS, b"").await), vec!["Harry"]);
}

#[tokio::test]
async fn test_list_users_and_rooms() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;
    let mut c = TestClient::connect(addr).await;
    a.sorting_hat().await;
    b.sorting_hat().await;
    c.sorting_hat().await;

    a.request(JOIN, &join_payload("library", "")).await;
    c.request(JOIN, &join_payload("library", "")).await;
    b.request(JOIN, &join_payload("astronomy", "stars")).await;

    assert_eq!(names(&a.request(LIST_USERS, b"").await), vec!["rand0", "rand2"]);
    assert_eq!(
        names(&a.request(LIST_ROOMS, b"").await),
        vec!["astronomy", "library"]
    );

    // Leaving the last member deletes the room
    assert_eq!(b.request(LEAVE, b"").await, vec![0x00]);
    assert_eq!(names(&b.request(LIST_ROOMS, b"").await), vec!["library"]);
    assert_eq!(
        names(&b.request(LIST_USERS, b"").await),
        vec!["rand0", "rand1", "rand2"]
    );
}

#[tokio::test]
async fn test_frame_split_across_writes() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;

    let frame = codec::encode(JOIN, &join_payload("gryffindor", "lion"));
    a.stream.write_all(&frame[..5]).await.unwrap();
    a.stream.flush().await.unwrap();
    sleep(Duration::from_millis(20)).await;
    a.stream.write_all(&frame[5..12]).await.unwrap();
    a.stream.flush().await.unwrap();
    sleep(Duration::from_millis(20)).await;
    a.stream.write_all(&frame[12..]).await.unwrap();

    let reply = a.recv().await;
    assert_eq!(&reply.payload[..], b"\x00");
    assert_eq!(names(&a.request(LIST_ROOMS, b"").await), vec!["gryffindor"]);
}

#[tokio::test]
async fn test_two_frames_in_one_write() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;

    let mut both = codec::encode(SORTING_HAT, b"").to_vec();
    both.extend_from_slice(&codec::encode(LIST_USERS, b""));
    a.stream.write_all(&both).await.unwrap();

    assert_eq!(&a.recv().await.payload[..], b"\x00rand0");
    assert_eq!(names(&a.recv().await.payload), vec!["rand0"]);
}

#[tokio::test]
async fn test_heartbeat_and_truncated_frames_get_no_reply() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;

    a.send(HEARTBEAT, b"").await;
    a.send(JOIN, b"\x0agry").await;
    a.send(NICK, b"").await;

    // Connection is still open and the next reply belongs to this request
    assert_eq!(names(&a.request(LIST_ROOMS, b"").await), Vec::<String>::new());
}

#[tokio::test]
async fn test_leave_without_room_disconnects() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    a.sorting_hat().await;

    a.send(LEAVE, b"").await;
    a.expect_closed().await;
}

#[tokio::test]
async fn test_bad_magic_disconnects() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;

    a.stream
        .write_all(&[0, 0, 0, 0, 0xbe, 0xef, SORTING_HAT])
        .await
        .unwrap();
    a.expect_closed().await;
}

#[tokio::test]
async fn test_unknown_opcode_disconnects() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;

    a.send(0x7f, b"").await;
    a.expect_closed().await;
}

#[tokio::test]
async fn test_nul_in_room_name_disconnects() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;

    a.send(JOIN, &join_payload("hall\0", "")).await;
    a.expect_closed().await;
}

#[tokio::test]
async fn test_oversize_message_replies_then_disconnects() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    a.sorting_hat().await;

    let mut payload = str8("rand0");
    payload.extend_from_slice(&[0xff, 0xff]);
    payload.resize(payload.len() + 65_536, b'a');
    a.send(MESSAGE, &payload).await;

    let reply = a.recv().await;
    assert_eq!(reply.opcode, RESPONSE);
    assert_eq!(&reply.payload[..], b"\x01Length limit exceeded.");
    a.expect_closed().await;
}

#[tokio::test]
async fn test_message_header_over_frame_limit_replies_then_disconnects() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    a.sorting_hat().await;

    // Only the header: a 2 MiB MESSAGE is rejected before its body arrives
    let mut header = (2u32 << 20).to_be_bytes().to_vec();
    header.extend_from_slice(&[0x04, 0x17, MESSAGE]);
    a.stream.write_all(&header).await.unwrap();
    a.stream.flush().await.unwrap();

    let reply = a.recv().await;
    assert_eq!(reply.opcode, RESPONSE);
    assert_eq!(&reply.payload[..], b"\x01Length limit exceeded.");
    a.expect_closed().await;
}

#[tokio::test]
async fn test_disconnect_frees_handle_and_room() {
    let (addr, _shutdown) = start_server().await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;
    a.sorting_hat().await;
    a.request(JOIN, &join_payload("attic", "")).await;
    drop(a);

    // The disconnect is processed asynchronously; wait for it to land
    timeout(WAIT, async {
        while !names(&b.request(LIST_ROOMS, b"").await).is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room was never deleted");

    assert_eq!(b.sorting_hat().await, "rand0");
}
