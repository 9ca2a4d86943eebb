//! Drives a `SocketImpl` from `CONNECTING` through any handshake into
//! `CONNECTED`, including the WS/WSS Digest one-shot retry (spec §4.1, §4.4).

use std::sync::Arc;
use std::time::Duration;

use async_tungstenite::WebSocketStream;

use crate::auth::AuthenticateContext;
use crate::error::Error;
use crate::message::Message;
use crate::transport::{self, BoxedStream};
use crate::util;
use crate::ws_context::WsResponseContext;

use super::io_loop;
use super::{SocketImpl, SocketState, TransportKind};

/// `generation` is the value `Inner::epoch` held when this attempt started
/// (see `SocketImpl::start_connect`). It is threaded through every stage so
/// the eventual commit point can check it is still current before mutating
/// state or firing a callback — a `Disconnect` that cancels this attempt
/// bumps `epoch`, which invalidates the value every stage below is carrying.
pub(crate) async fn begin_connect(socket: Arc<SocketImpl>, timeout: Option<Duration>, generation: u64) {
    let attempt = run_connect(socket.clone(), generation);
    let outcome = match timeout {
        Some(duration) => match util::timeout(duration, attempt).await {
            Ok(result) => result,
            Err(_) => Err(Error::TimedOut),
        },
        None => attempt.await,
    };

    if let Err(err) = outcome {
        finish_with_error(&socket, generation, err);
    }
}

fn finish_with_error(socket: &Arc<SocketImpl>, generation: u64, err: Error) {
    let should_fire = {
        let mut inner = socket.inner.lock().unwrap();
        if inner.epoch != generation {
            // Superseded by a Disconnect (or a fresh Connect) since this
            // attempt started; that transition already produced its own
            // OnDisconnect, or there is a newer attempt in flight now.
            return;
        }
        let was_attempting = matches!(inner.state, SocketState::Connecting | SocketState::Handshaking);
        inner.state = SocketState::Disconnected;
        was_attempting
    };
    if should_fire {
        io_loop::fire_disconnect(socket, err);
    }
}

fn is_current(socket: &Arc<SocketImpl>, generation: u64) -> bool {
    socket.inner.lock().unwrap().epoch == generation
}

async fn run_connect(socket: Arc<SocketImpl>, generation: u64) -> crate::error::Result<()> {
    match socket.transport {
        TransportKind::Tcp => connect_tcp(&socket, generation).await,
        TransportKind::Ssl => connect_ssl(&socket, generation).await,
        TransportKind::Ws => connect_ws(&socket, generation).await,
        TransportKind::Wss => connect_wss(&socket, generation).await,
    }
}

async fn connect_tcp(socket: &Arc<SocketImpl>, generation: u64) -> crate::error::Result<()> {
    let stream = transport::tcp::connect(&socket.host, socket.port, socket.bind_iface.as_deref()).await?;
    let boxed: BoxedStream = Box::pin(stream);
    complete_raw(socket, generation, boxed);
    Ok(())
}

#[cfg(feature = "tls")]
async fn connect_ssl(socket: &Arc<SocketImpl>, generation: u64) -> crate::error::Result<()> {
    set_state(socket, SocketState::Handshaking);
    let tcp = transport::tcp::connect(&socket.host, socket.port, socket.bind_iface.as_deref()).await?;
    let tls_config = socket
        .tls_config
        .clone()
        .ok_or_else(|| Error::InvalidArgument("SSL socket requires a TlsConfig".into()))?;
    let tls = transport::tls::connect_client(&tls_config, &socket.host, tcp).await?;
    let tls_info = transport::tls::connection_info(&tls);
    socket.inner.lock().unwrap().tls_info = Some(tls_info);
    complete_raw(socket, generation, Box::pin(tls));
    Ok(())
}

#[cfg(not(feature = "tls"))]
async fn connect_ssl(_socket: &Arc<SocketImpl>, _generation: u64) -> crate::error::Result<()> {
    Err(Error::InvalidArgument("crate built without the `tls` feature".into()))
}

/// Commits a successful raw (TCP/SSL) connect, unless cancelled in the
/// interim (spec §4.2: Disconnect is the only cancel, and it must never be
/// followed by a phantom OnConnect).
fn complete_raw(socket: &Arc<SocketImpl>, generation: u64, stream: BoxedStream) {
    {
        let mut inner = socket.inner.lock().unwrap();
        if inner.epoch != generation {
            return;
        }
        inner.state = SocketState::Connected;
    }
    io_loop::spawn_raw(socket.clone(), stream);
    io_loop::fire_connect(socket);
}

async fn connect_ws(socket: &Arc<SocketImpl>, generation: u64) -> crate::error::Result<()> {
    let request_ctx = socket
        .ws_request
        .clone()
        .ok_or_else(|| Error::InvalidArgument("WS socket requires a WsRequestContext".into()))?;

    let mut auth_state: Option<AuthenticateContext> = None;
    for _attempt in 0..2u8 {
        if !is_current(socket, generation) {
            return Ok(());
        }
        set_state(socket, SocketState::Handshaking);
        let stream = transport::tcp::connect(&socket.host, socket.port, socket.bind_iface.as_deref()).await?;
        match transport::ws::attempt_upgrade(stream, &socket.host, socket.port, &request_ctx, auth_state.as_ref())
            .await?
        {
            transport::ws::UpgradeOutcome::Success { stream, response } => {
                complete_ws(socket, generation, stream, response);
                return Ok(());
            },
            transport::ws::UpgradeOutcome::Challenged { status, www_authenticate } => {
                let Some(header) = www_authenticate else {
                    return Err(Error::Handshake("401 without WWW-Authenticate".into()));
                };
                let next = AuthenticateContext::parse(&header, auth_state.as_ref())
                    .ok_or_else(|| Error::Handshake("unparseable WWW-Authenticate".into()))?;
                if !next.should_retry(status) {
                    return Err(Error::AuthFailed);
                }
                auth_state = Some(next);
            },
        }
    }
    Err(Error::AuthFailed)
}

#[cfg(feature = "tls")]
async fn connect_wss(socket: &Arc<SocketImpl>, generation: u64) -> crate::error::Result<()> {
    let request_ctx = socket
        .ws_request
        .clone()
        .ok_or_else(|| Error::InvalidArgument("WSS socket requires a WsRequestContext".into()))?;
    let tls_config = socket
        .tls_config
        .clone()
        .ok_or_else(|| Error::InvalidArgument("WSS socket requires a TlsConfig".into()))?;

    let mut auth_state: Option<AuthenticateContext> = None;
    for _attempt in 0..2u8 {
        if !is_current(socket, generation) {
            return Ok(());
        }
        set_state(socket, SocketState::Handshaking);
        let tcp = transport::tcp::connect(&socket.host, socket.port, socket.bind_iface.as_deref()).await?;
        let tls = transport::tls::connect_client(&tls_config, &socket.host, tcp).await?;
        let tls_info = transport::tls::connection_info(&tls);
        match transport::ws::attempt_upgrade(tls, &socket.host, socket.port, &request_ctx, auth_state.as_ref())
            .await?
        {
            transport::ws::UpgradeOutcome::Success { stream, response } => {
                socket.inner.lock().unwrap().tls_info = Some(tls_info);
                complete_ws(socket, generation, stream, response);
                return Ok(());
            },
            transport::ws::UpgradeOutcome::Challenged { status, www_authenticate } => {
                let Some(header) = www_authenticate else {
                    return Err(Error::Handshake("401 without WWW-Authenticate".into()));
                };
                let next = AuthenticateContext::parse(&header, auth_state.as_ref())
                    .ok_or_else(|| Error::Handshake("unparseable WWW-Authenticate".into()))?;
                if !next.should_retry(status) {
                    return Err(Error::AuthFailed);
                }
                auth_state = Some(next);
            },
        }
    }
    Err(Error::AuthFailed)
}

#[cfg(not(feature = "tls"))]
async fn connect_wss(_socket: &Arc<SocketImpl>, _generation: u64) -> crate::error::Result<()> {
    Err(Error::InvalidArgument("crate built without the `tls` feature".into()))
}

fn complete_ws<S>(socket: &Arc<SocketImpl>, generation: u64, stream: WebSocketStream<S>, response: WsResponseContext)
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + Send + 'static,
{
    {
        let mut inner = socket.inner.lock().unwrap();
        if inner.epoch != generation {
            return;
        }
        inner.ws_response = Some(response);
        inner.state = SocketState::Connected;
    }
    io_loop::spawn_ws(socket.clone(), stream);
    io_loop::fire_connect(socket);
}

fn set_state(socket: &Arc<SocketImpl>, state: SocketState) {
    socket.inner.lock().unwrap().state = state;
}

