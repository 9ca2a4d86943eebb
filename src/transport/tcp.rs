//! Plain-TCP dial and listen, including optional bind-interface support.
//!
//! Grounded on `examples/magic-wormhole-magic-wormhole.rs/src/transit/transport.rs`'s
//! `tcp_connect_custom`, which reaches for `socket2` whenever it needs a
//! socket option `async_std::net::TcpStream` doesn't expose directly.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use async_std::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};
use crate::util;

const LISTEN_BACKLOG: i32 = 10;

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(Error::Io)?
        .next()
        .ok_or_else(|| Error::InvalidArgument(format!("unresolvable host {host}").into_boxed_str()))
}

/// Validate `bind_iface` can be applied to a socket, without dialing anywhere.
/// `Socket::connect`/`connect_timeout` call this before posting to the event
/// loop, so a bad interface name surfaces as a synchronous `Err` from the
/// call itself rather than later as an `OnDisconnect`, per the spec's Design
/// Notes decision to standardize on synchronous `EINVAL` for this failure.
pub fn check_bind_iface(bind_iface: Option<&str>) -> Result<()> {
    let Some(iface) = bind_iface else { return Ok(()) };
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(Error::Io)?;
    bind_to_device(&socket, iface)
}

/// Connect to `host:port`, optionally bound to a specific network interface
/// (`SO_BINDTODEVICE` on Linux). `bind_iface` is assumed already validated by
/// [`check_bind_iface`]; a failure here (e.g. the interface vanished between
/// the two calls) still surfaces as an async `OnDisconnect`.
pub async fn connect(host: &str, port: u16, bind_iface: Option<&str>) -> Result<TcpStream> {
    let addr = resolve(host, port)?;

    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(Error::Io)?;

    if let Some(iface) = bind_iface {
        bind_to_device(&socket, iface)?;
    }

    socket.set_nonblocking(true).map_err(Error::Io)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {},
        Err(err) if err.raw_os_error() == Some(libc_einprogress()) => {},
        Err(err) => return Err(Error::Io(err)),
    }

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from(std_stream);
    stream.set_nodelay(true).ok();
    Ok(stream)
}

pub async fn connect_timeout(
    host: &str,
    port: u16,
    bind_iface: Option<&str>,
    duration: Duration,
) -> Result<TcpStream> {
    match util::timeout(duration, connect(host, port, bind_iface)).await {
        Ok(result) => result,
        Err(_) => Err(Error::TimedOut),
    }
}

#[cfg(target_os = "linux")]
fn bind_to_device(socket: &Socket, iface: &str) -> Result<()> {
    socket
        .bind_device(Some(iface.as_bytes()))
        .map_err(|err| Error::InvalidArgument(format!("bindtodevice {iface}: {err}").into_boxed_str()))
}

#[cfg(not(target_os = "linux"))]
fn bind_to_device(_socket: &Socket, iface: &str) -> Result<()> {
    Err(Error::InvalidArgument(
        format!("bindtodevice {iface}: not supported on this platform").into_boxed_str(),
    ))
}

#[cfg(target_os = "linux")]
fn libc_einprogress() -> i32 {
    115 // EINPROGRESS
}

#[cfg(not(target_os = "linux"))]
fn libc_einprogress() -> i32 {
    36 // EINPROGRESS on BSD/macOS
}

/// Bind and listen with a fixed backlog of 10, the value `ServerImpl::Start`
/// uses regardless of platform default.
pub async fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    let addr = resolve(host, port)?;
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(Error::Io)?;
    socket.set_reuse_address(true).map_err(Error::Io)?;
    socket.bind(&addr.into()).map_err(Error::Io)?;
    socket.listen(LISTEN_BACKLOG).map_err(Error::Io)?;
    socket.set_nonblocking(true).map_err(Error::Io)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from(std_listener))
}
