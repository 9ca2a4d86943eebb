//! `ClientImpl`: a socket factory bound to one transport kind, event loop,
//! and application handler (spec §4.6).

use std::sync::Arc;

use crate::event_loop::EventLoop;
use crate::handler::{Handler, HandlerDelegate};
use crate::message::{Codec, MsgpackCodec};
use crate::socket::{Socket, SocketImpl, TransportKind};
use crate::tls_config::TlsConfig;
use crate::ws_context::WsRequestContext;

/// Builds outbound sockets of one fixed transport kind. Holds the default TLS
/// context for secure variants and the loop every socket it creates registers
/// with, mirroring the teacher's client-side connection-builder pattern.
pub struct Client {
    transport: TransportKind,
    loop_: EventLoop,
    tls_config: Option<TlsConfig>,
    codec_factory: Arc<dyn Fn() -> Box<dyn Codec> + Send + Sync>,
    delegate: Arc<HandlerDelegate>,
}

impl Client {
    fn new(transport: TransportKind, handler: Arc<dyn Handler>, tls_config: Option<TlsConfig>) -> Self {
        Client {
            transport,
            loop_: EventLoop::default_loop(),
            tls_config,
            codec_factory: Arc::new(|| Box::new(MsgpackCodec::default())),
            delegate: HandlerDelegate::new(handler),
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

    /// Use a different loop than the process-wide default.
    pub fn with_loop(mut self, loop_: EventLoop) -> Self {
        self.loop_ = loop_;
        self
    }

    /// Swap the bundled `MsgpackCodec` default for an application-supplied `Codec`.
    pub fn with_codec<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Codec> + Send + Sync + 'static,
    {
        self.codec_factory = Arc::new(factory);
        self
    }

    /// Construct a socket in `DISCONNECTED`. Does not connect; call
    /// `Socket::connect` (or `connect_timeout`) to begin.
    pub fn create_socket(&self, host: impl Into<String>, port: u16) -> Socket {
        self.create_socket_with_context(host, port, None)
    }

    /// As [`Client::create_socket`], but supplies the WS request context
    /// (path/query/headers/credentials) a WS or WSS socket needs at Connect time.
    pub fn create_socket_with_context(
        &self,
        host: impl Into<String>,
        port: u16,
        ws_request: Option<WsRequestContext>,
    ) -> Socket {
        let inner = SocketImpl::new(
            self.transport,
            host.into(),
            port,
            None,
            self.tls_config.clone(),
            ws_request.or_else(|| matches!(self.transport, TransportKind::Ws | TransportKind::Wss).then(WsRequestContext::new)),
            self.codec_factory.clone(),
            self.loop_.clone(),
        );
        inner.set_delegate(&self.delegate);
        Socket::from_impl(inner)
    }

    /// As [`Client::create_socket`], bound to a specific network interface
    /// (`SO_BINDTODEVICE`).
    pub fn create_socket_on_interface(&self, host: impl Into<String>, port: u16, iface: &str) -> Socket {
        let inner = SocketImpl::new(
            self.transport,
            host.into(),
            port,
            Some(iface.to_string()),
            self.tls_config.clone(),
            matches!(self.transport, TransportKind::Ws | TransportKind::Wss).then(WsRequestContext::new),
            self.codec_factory.clone(),
            self.loop_.clone(),
        );
        inner.set_delegate(&self.delegate);
        Socket::from_impl(inner)
    }
}
