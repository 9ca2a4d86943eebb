//! Transport-specific connect/accept/handshake wrappers around the common
//! `SocketImpl` state machine (spec §4.1 row "TCP / SSL / WS / WSS SocketImpl").

pub mod tcp;
pub mod ws;

#[cfg(feature = "tls")]
pub mod tls;

use std::pin::Pin;

use futures::{AsyncRead, AsyncWrite};

/// The thing a connected socket actually reads/writes bytes through, once any
/// TLS layer has been applied. Boxed so `SocketImpl` doesn't need a type
/// parameter per transport kind.
pub type BoxedStream = Pin<Box<dyn AsyncReadWrite>>;

pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}
