//! `ServerImpl`: binds, listens (backlog 10), and spawns inbound sockets on
//! accept (spec §4.6), including the WS/WSS server-side auth challenge (§4.4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;

use crate::auth::digest::verify_digest_response_from_ha1;
use crate::auth::{parse_authorization, NoncePool, Scheme};
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::handler::{AuthValidator, Handler, HandlerDelegate};
use crate::message::{Codec, MsgpackCodec};
use crate::socket::io_loop;
use crate::socket::{SocketImpl, SocketState, TransportKind};
use crate::tls_config::TlsConfig;
use crate::transport;
use crate::util::ensure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stop,
    Start,
}

/// Server-side Basic/Digest configuration. Absent means no challenge is ever issued.
pub struct ServerAuth {
    pub scheme: Scheme,
    pub realm: String,
    pub validator: Arc<dyn AuthValidator>,
}

pub struct Server {
    transport: TransportKind,
    loop_: EventLoop,
    tls_config: Option<TlsConfig>,
    codec_factory: Arc<dyn Fn() -> Box<dyn Codec> + Send + Sync>,
    delegate: Arc<HandlerDelegate>,
    auth: Option<ServerAuth>,
    nonces: Arc<Mutex<NoncePool>>,
    state: Mutex<ServerState>,
    generation: AtomicU64,
}

impl Server {
    fn new(transport: TransportKind, handler: Arc<dyn Handler>, tls_config: Option<TlsConfig>) -> Self {
        Server {
            transport,
            loop_: EventLoop::default_loop(),
            tls_config,
            codec_factory: Arc::new(|| Box::new(MsgpackCodec::default())),
            delegate: HandlerDelegate::new(handler),
            auth: None,
            nonces: Arc::new(Mutex::new(NoncePool::new())),
            state: Mutex::new(ServerState::Stop),
            generation: AtomicU64::new(0),
        }
    }

    pub fn tcp(handler: Arc<dyn Handler>) -> Self {
        Self::new(TransportKind::Tcp, handler, None)
    }

    #[cfg(feature = "tls")]
    pub fn ssl(handler: Arc<dyn Handler>, tls_config: TlsConfig) -> Self {
        Self::new(TransportKind::Ssl, handler, Some(tls_config))
    }

    pub fn ws(handler: Arc<dyn Handler>) -> Self {
        Self::new(TransportKind::Ws, handler, None)
    }

    #[cfg(feature = "tls")]
    pub fn wss(handler: Arc<dyn Handler>, tls_config: TlsConfig) -> Self {
        Self::new(TransportKind::Wss, handler, Some(tls_config))
    }

    pub fn with_loop(mut self, loop_: EventLoop) -> Self {
        self.loop_ = loop_;
        self
    }

    pub fn with_codec<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Codec> + Send + Sync + 'static,
    {
        self.codec_factory = Arc::new(factory);
        self
    }

    /// Only meaningful for WS/WSS: enable the Basic/Digest challenge on accept.
    pub fn with_auth(mut self, scheme: Scheme, realm: impl Into<String>, validator: Arc<dyn AuthValidator>) -> Self {
        self.auth = Some(ServerAuth {
            scheme,
            realm: realm.into(),
            validator,
        });
        self
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    /// Bind, listen with backlog 10, and start accepting inbound connections.
    pub fn start(self: &Arc<Self>, host: &str, port: u16) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            ensure!(*state == ServerState::Stop, Error::AlreadyInProgress);
            *state = ServerState::Start;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        let host = host.to_string();
        self.loop_.clone().post(async move {
            let listener = match transport::tcp::bind_listener(&host, port).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::warn!(%err, "server failed to bind");
                    *this.state.lock().unwrap() = ServerState::Stop;
                    return;
                },
            };
            loop {
                if this.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let this = this.clone();
                        this.loop_.post(async move { this.accept_one(stream).await });
                    },
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                        return;
                    },
                }
            }
        });
        Ok(())
    }

    /// Close the listener and disconnect every accepted socket.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        ensure!(*state == ServerState::Start, Error::AlreadyInProgress);
        *state = ServerState::Stop;
        self.generation.fetch_add(1, Ordering::SeqCst);
        for socket in self.delegate.sockets() {
            let _ = socket.disconnect();
        }
        Ok(())
    }

    async fn accept_one(self: Arc<Self>, stream: async_std::net::TcpStream) {
        let inner = match self.transport {
            TransportKind::Tcp => Some(self.spawn_plain(Box::pin(stream))),
            TransportKind::Ws => self.accept_ws(stream).await,
            #[cfg(feature = "tls")]
            TransportKind::Ssl => self.accept_ssl(stream).await,
            #[cfg(feature = "tls")]
            TransportKind::Wss => self.accept_wss(stream).await,
            #[cfg(not(feature = "tls"))]
            TransportKind::Ssl | TransportKind::Wss => None,
        };
        let _ = inner;
    }

    fn spawn_plain(self: &Arc<Self>, stream: crate::transport::BoxedStream) -> Arc<SocketImpl> {
        let inner = SocketImpl::new(
            self.transport,
            String::new(),
            0,
            None,
            self.tls_config.clone(),
            None,
            self.codec_factory.clone(),
            self.loop_.clone(),
        );
        inner.set_delegate(&self.delegate);
        inner.inner.lock().unwrap().state = SocketState::Connected;
        io_loop::spawn_raw(inner.clone(), stream);
        io_loop::fire_connect(&inner);
        inner
    }

    #[cfg(feature = "tls")]
    async fn accept_ssl(self: &Arc<Self>, stream: async_std::net::TcpStream) -> Option<Arc<SocketImpl>> {
        let tls_config = self.tls_config.as_ref()?;
        let tls = transport::tls::accept_server(tls_config, stream).await.ok()?;
        Some(self.spawn_plain(Box::pin(tls)))
    }

    async fn accept_ws(self: &Arc<Self>, stream: async_std::net::TcpStream) -> Option<Arc<SocketImpl>> {
        self.accept_ws_generic(stream).await
    }

    #[cfg(feature = "tls")]
    async fn accept_wss(self: &Arc<Self>, stream: async_std::net::TcpStream) -> Option<Arc<SocketImpl>> {
        let tls_config = self.tls_config.as_ref()?;
        let tls = transport::tls::accept_server(tls_config, stream).await.ok()?;
        self.accept_ws_generic(tls).await
    }

    async fn accept_ws_generic<S>(self: &Arc<Self>, stream: S) -> Option<Arc<SocketImpl>>
    where
        S: futures::AsyncRead + futures::AsyncWrite + Unpin + Send + 'static,
    {
        let nonces = self.nonces.clone();
        let auth = self.auth.clone_ref();
        let ws_stream = transport::ws::accept(stream, move |req| decide_auth(req, auth.as_ref(), &nonces)).await.ok()?;

        let inner = SocketImpl::new(
            self.transport,
            String::new(),
            0,
            None,
            self.tls_config.clone(),
            None,
            self.codec_factory.clone(),
            self.loop_.clone(),
        );
        inner.set_delegate(&self.delegate);
        inner.inner.lock().unwrap().state = SocketState::Connected;
        io_loop::spawn_ws(inner.clone(), ws_stream);
        io_loop::fire_connect(&inner);
        Some(inner)
    }
}

impl ServerAuth {
    /// `ServerAuth` isn't `Clone` (the validator is a trait object behind
    /// `Arc`, which is cheap to share); this names that sharing explicitly
    /// for the accept closure, which outlives the borrow of `self.auth`.
    fn clone_ref(&self) -> ServerAuth {
        ServerAuth {
            scheme: self.scheme,
            realm: self.realm.clone(),
            validator: self.validator.clone(),
        }
    }
}

trait OptionServerAuthExt {
    fn clone_ref(&self) -> Option<ServerAuth>;
}

impl OptionServerAuthExt for Option<ServerAuth> {
    fn clone_ref(&self) -> Option<ServerAuth> {
        self.as_ref().map(ServerAuth::clone_ref)
    }
}

fn decide_auth(
    req: &async_tungstenite::tungstenite::handshake::client::Request,
    auth: Option<&ServerAuth>,
    nonces: &Arc<Mutex<NoncePool>>,
) -> transport::ws::AcceptDecision {
    use transport::ws::AcceptDecision;

    let Some(auth) = auth else {
        return AcceptDecision::Accept;
    };

    let method = req.method().as_str().to_string();
    let uri = req.uri().path().to_string();

    let Some(header) = req.headers().get("Authorization").and_then(|v| v.to_str().ok()) else {
        return challenge(auth, nonces, false);
    };

    let Some((scheme, fields)) = parse_authorization(header) else {
        return challenge(auth, nonces, false);
    };

    match (auth.scheme, scheme) {
        (Scheme::Basic, Scheme::Basic) => {
            let Some(creds) = fields.get("__raw").cloned().or_else(|| {
                header
                    .splitn(2, char::is_whitespace)
                    .nth(1)
                    .map(str::trim)
                    .map(str::to_string)
            }) else {
                return challenge(auth, nonces, false);
            };
            let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(creds) else {
                return challenge(auth, nonces, false);
            };
            let Ok(decoded) = String::from_utf8(decoded) else {
                return challenge(auth, nonces, false);
            };
            let Some((username, password)) = decoded.split_once(':') else {
                return challenge(auth, nonces, false);
            };
            if auth.validator.validate(username, &auth.realm, &method, &uri, password) {
                AcceptDecision::Accept
            } else {
                // Basic has no nonce/stale retry mechanism; a bad credential
                // closes the connection instead of re-challenging (spec §4.4).
                AcceptDecision::Close
            }
        },
        (Scheme::Digest, Scheme::Digest) => {
            let empty = String::new();
            let nonce = fields.get("nonce").unwrap_or(&empty);
            let validation = nonces.lock().unwrap().validate(nonce);
            if !matches!(validation, crate::auth::nonce::Validation::Valid) {
                return challenge(auth, nonces, matches!(validation, crate::auth::nonce::Validation::Stale));
            }

            let username = fields.get("username").cloned().unwrap_or_default();
            let uri_field = fields.get("uri").cloned().unwrap_or(uri);
            let nc = fields.get("nc").cloned().unwrap_or_default();
            let cnonce = fields.get("cnonce").cloned().unwrap_or_default();
            let response = fields.get("response").cloned().unwrap_or_default();
            let qop = fields.get("qop").cloned();
            let realm = fields.get("realm").cloned().unwrap_or_else(|| auth.realm.clone());

            let Some(ha1) = auth.validator.ha1(&username, &realm) else {
                return challenge(auth, nonces, false);
            };

            let matches = verify_digest_response_from_ha1(
                &ha1,
                nonce,
                qop.as_deref(),
                &nc,
                &cnonce,
                &method,
                &uri_field,
                &response,
            );
            if matches {
                AcceptDecision::Accept
            } else {
                challenge(auth, nonces, false)
            }
        },
        _ => challenge(auth, nonces, false),
    }
}

fn challenge(auth: &ServerAuth, nonces: &Arc<Mutex<NoncePool>>, stale: bool) -> transport::ws::AcceptDecision {
    let header = match auth.scheme {
        Scheme::Basic => format!(r#"Basic realm="{}""#, auth.realm),
        Scheme::Digest => {
            let nonce = nonces.lock().unwrap().mint();
            format!(
                r#"Digest realm="{}", nonce="{}", qop="auth", algorithm=MD5{}"#,
                auth.realm,
                nonce,
                if stale { ", stale=true" } else { "" }
            )
        },
        Scheme::Unused => String::new(),
    };
    transport::ws::AcceptDecision::Challenge {
        status: 401,
        www_authenticate: header,
    }
}

