//! The literal scenarios from spec §8 (TESTABLE PROPERTIES), exercised over
//! real loopback TCP/WS connections rather than mocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ferrolink::{
    AuthScheme, AuthValidator, Client, Error, ErrorKind, Handler, Server, Socket, WsAuthenticate, WsRequestContext,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

enum Event {
    Connect(Socket),
    Disconnect(Error),
}

struct ChannelHandler {
    tx: mpsc::Sender<Event>,
}

impl Handler for ChannelHandler {
    fn on_connect(&self, socket: Socket) {
        let _ = self.tx.send(Event::Connect(socket));
    }

    fn on_disconnect(&self, _socket: Socket, reason: Error) {
        let _ = self.tx.send(Event::Disconnect(reason));
    }
}

fn channel_handler() -> (Arc<ChannelHandler>, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(ChannelHandler { tx }), rx)
}

fn expect_connect(rx: &mpsc::Receiver<Event>) -> Socket {
    match rx.recv_timeout(RECV_TIMEOUT) {
        Ok(Event::Connect(socket)) => socket,
        Ok(Event::Disconnect(err)) => panic!("expected OnConnect, got OnDisconnect({err})"),
        Err(_) => panic!("timed out waiting for OnConnect"),
    }
}

fn expect_disconnect(rx: &mpsc::Receiver<Event>) -> Error {
    match rx.recv_timeout(RECV_TIMEOUT) {
        Ok(Event::Disconnect(err)) => err,
        Ok(Event::Connect(_)) => panic!("expected OnDisconnect, got OnConnect"),
        Err(_) => panic!("timed out waiting for OnDisconnect"),
    }
}

/// A server's accept loop binds on its own loop thread; give it a moment to
/// actually reach `listen()` before a client tries to connect.
fn settle() {
    std::thread::sleep(Duration::from_millis(150));
}

#[test]
fn connect_refuse() {
    let (handler, rx) = channel_handler();
    let client = Client::tcp(handler);
    // Nothing is listening on this port.
    let socket = client.create_socket("127.0.0.1", 18801);
    socket.connect().unwrap();

    let err = expect_disconnect(&rx);
    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
}

#[test]
fn connect_timeout() {
    let (handler, rx) = channel_handler();
    let client = Client::tcp(handler);
    // TEST-NET-1 (RFC 5737): reserved, never routable, so the handshake never completes.
    let socket = client.create_socket("192.0.2.1", 18802);
    socket.connect_timeout(Duration::from_millis(1)).unwrap();

    let err = expect_disconnect(&rx);
    assert_eq!(err.kind(), ErrorKind::TimedOut);
}

#[test]
fn double_connect() {
    let (server_handler, _server_rx) = channel_handler();
    let server = Arc::new(Server::tcp(server_handler));
    server.start("127.0.0.1", 18803).unwrap();
    settle();

    let (client_handler, client_rx) = channel_handler();
    let client = Client::tcp(client_handler);
    let socket = client.create_socket("127.0.0.1", 18803);
    socket.connect().unwrap();
    expect_connect(&client_rx);

    let result = socket.connect();
    assert!(matches!(result, Err(Error::AlreadyInProgress)));

    server.stop().unwrap();
}

#[test]
fn disconnect_from_peer() {
    let (server_handler, server_rx) = channel_handler();
    let server = Arc::new(Server::tcp(server_handler));
    server.start("127.0.0.1", 18804).unwrap();
    settle();

    let (client_handler, client_rx) = channel_handler();
    let client = Client::tcp(client_handler);
    let socket = client.create_socket("127.0.0.1", 18804);
    socket.connect().unwrap();

    let server_socket = expect_connect(&server_rx);
    expect_connect(&client_rx);

    server_socket.disconnect().unwrap();

    assert_eq!(expect_disconnect(&server_rx).kind(), ErrorKind::Ok);
    assert_eq!(expect_disconnect(&client_rx).kind(), ErrorKind::Eof);

    server.stop().unwrap();
}

/// Calls `Disconnect()` from inside `OnConnect`, on the loop thread, which
/// must be deferred rather than recursing into the state machine.
struct ReentrantDisconnectHandler {
    tx: mpsc::Sender<Event>,
}

impl Handler for ReentrantDisconnectHandler {
    fn on_connect(&self, socket: Socket) {
        let _ = self.tx.send(Event::Connect(socket.clone()));
        socket.disconnect().unwrap();
    }

    fn on_disconnect(&self, _socket: Socket, reason: Error) {
        let _ = self.tx.send(Event::Disconnect(reason));
    }
}

#[test]
fn reentrant_disconnect() {
    let (server_handler, server_rx) = channel_handler();
    let server = Arc::new(Server::tcp(server_handler));
    server.start("127.0.0.1", 18805).unwrap();
    settle();

    let (client_tx, client_rx) = mpsc::channel();
    let client = Client::tcp(Arc::new(ReentrantDisconnectHandler { tx: client_tx }));
    let socket = client.create_socket("127.0.0.1", 18805);
    socket.connect().unwrap();

    expect_connect(&client_rx);
    assert_eq!(expect_disconnect(&client_rx).kind(), ErrorKind::Ok);
    assert_eq!(expect_disconnect(&server_rx).kind(), ErrorKind::Eof);

    server.stop().unwrap();
}

/// Reconnects the same handle from inside `OnDisconnect`, once.
struct ReconnectHandler {
    tx: mpsc::Sender<Event>,
    reconnected: AtomicBool,
}

impl Handler for ReconnectHandler {
    fn on_connect(&self, socket: Socket) {
        let _ = self.tx.send(Event::Connect(socket));
    }

    fn on_disconnect(&self, socket: Socket, reason: Error) {
        let _ = self.tx.send(Event::Disconnect(reason));
        if !self.reconnected.swap(true, Ordering::SeqCst) {
            socket.connect().unwrap();
        }
    }
}

#[test]
fn reconnect_identity() {
    let (server_handler, server_rx) = channel_handler();
    let server = Arc::new(Server::tcp(server_handler));
    server.start("127.0.0.1", 18806).unwrap();
    settle();

    let (client_tx, client_rx) = mpsc::channel();
    let client = Client::tcp(Arc::new(ReconnectHandler {
        tx: client_tx,
        reconnected: AtomicBool::new(false),
    }));
    let socket = client.create_socket("127.0.0.1", 18806);
    socket.connect().unwrap();

    let first = expect_connect(&client_rx);
    let first_server_socket = expect_connect(&server_rx);
    first_server_socket.disconnect().unwrap();

    expect_disconnect(&client_rx);
    let second = expect_connect(&client_rx);
    assert_eq!(first, second, "reconnecting the same handle must preserve identity");

    server.stop().unwrap();
}

struct HtdigestCredential {
    username: String,
    password: String,
}

impl AuthValidator for HtdigestCredential {
    fn validate(&self, username: &str, _realm: &str, _method: &str, _uri: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }

    fn ha1(&self, username: &str, realm: &str) -> Option<String> {
        use md5::{Digest, Md5};
        if username != self.username {
            return None;
        }
        let mut hasher = Md5::new();
        hasher.update(format!("{username}:{realm}:{}", self.password).as_bytes());
        Some(hex::encode(hasher.finalize()))
    }
}

#[test]
fn digest_retry() {
    let (server_handler, _server_rx) = channel_handler();
    let validator = Arc::new(HtdigestCredential {
        username: "alice".into(),
        password: "hunter2".into(),
    });
    let server = Arc::new(Server::ws(server_handler).with_auth(AuthScheme::Digest, "ferrolink", validator));
    server.start("127.0.0.1", 18807).unwrap();
    settle();

    let (client_handler, client_rx) = channel_handler();
    let client = Client::ws(client_handler);
    let ws_context = WsRequestContext {
        path: "/rpc".into(),
        query: String::new(),
        headers: Vec::new(),
        authenticate: Some(WsAuthenticate {
            scheme: AuthScheme::Digest,
            username: "alice".into(),
            password: "hunter2".into(),
        }),
    };
    let socket = client.create_socket_with_context("127.0.0.1", 18807, Some(ws_context));
    socket.connect_timeout(Duration::from_secs(2)).unwrap();

    // Exactly one OnConnect: the first upgrade attempt is challenged with a
    // 401, the retry with nc=1 succeeds, and the client only ever observes
    // the successful half of that exchange.
    expect_connect(&client_rx);
    assert!(client_rx.try_recv().is_err(), "a second OnConnect fired unexpectedly");

    socket.disconnect().unwrap();
    server.stop().unwrap();
}

#[test]
fn basic_auth_succeeds_on_first_attempt() {
    let (server_handler, _server_rx) = channel_handler();
    let validator = Arc::new(HtdigestCredential {
        username: "alice".into(),
        password: "hunter2".into(),
    });
    let server = Arc::new(Server::ws(server_handler).with_auth(AuthScheme::Basic, "ferrolink", validator));
    server.start("127.0.0.1", 18808).unwrap();
    settle();

    let (client_handler, client_rx) = channel_handler();
    let client = Client::ws(client_handler);
    let ws_context = WsRequestContext {
        path: "/rpc".into(),
        query: String::new(),
        headers: Vec::new(),
        authenticate: Some(WsAuthenticate {
            scheme: AuthScheme::Basic,
            username: "alice".into(),
            password: "hunter2".into(),
        }),
    };
    let socket = client.create_socket_with_context("127.0.0.1", 18808, Some(ws_context));
    socket.connect_timeout(Duration::from_secs(2)).unwrap();

    // Basic credentials are sent unconditionally, so there's no 401 round
    // trip at all: the very first upgrade attempt succeeds.
    expect_connect(&client_rx);

    socket.disconnect().unwrap();
    server.stop().unwrap();
}

#[test]
fn basic_auth_mismatch_closes_without_retry() {
    let (server_handler, _server_rx) = channel_handler();
    let validator = Arc::new(HtdigestCredential {
        username: "alice".into(),
        password: "hunter2".into(),
    });
    let server = Arc::new(Server::ws(server_handler).with_auth(AuthScheme::Basic, "ferrolink", validator));
    server.start("127.0.0.1", 18809).unwrap();
    settle();

    let (client_handler, client_rx) = channel_handler();
    let client = Client::ws(client_handler);
    let ws_context = WsRequestContext {
        path: "/rpc".into(),
        query: String::new(),
        headers: Vec::new(),
        authenticate: Some(WsAuthenticate {
            scheme: AuthScheme::Basic,
            username: "alice".into(),
            password: "wrong".into(),
        }),
    };
    let socket = client.create_socket_with_context("127.0.0.1", 18809, Some(ws_context));
    socket.connect_timeout(Duration::from_secs(2)).unwrap();

    // No WWW-Authenticate invitation to retry: the server just closes, and
    // the client never sees an OnConnect for this attempt.
    expect_disconnect(&client_rx);

    server.stop().unwrap();
}
