//! `ferrolink`: a bidirectional RPC runtime over TCP, TLS, WebSocket and
//! WebSocket-over-TLS, built around a single-threaded event loop shared by
//! every socket a process creates.
//!
//! A [`Client`] or [`Server`] hands out [`Socket`] handles bound to one of
//! the four transport kinds; all state transitions, reads and writes for
//! every socket happen on that loop's own thread, so application code never
//! has to synchronize against concurrent I/O. [`Handler`] is the callback
//! surface a socket's owner implements to observe connects, disconnects and
//! inbound messages.

#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod error;
pub mod event_loop;
pub mod group;
pub mod handler;
pub mod message;
pub mod request;
pub mod server;
pub mod socket;
pub mod tls_config;
pub mod transport;
mod util;
pub mod ws_context;

pub use auth::{AuthenticateContext, NoncePool, Scheme as AuthScheme};
pub use client::Client;
pub use error::{Error, ErrorKind, Result};
pub use event_loop::EventLoop;
pub use group::GroupTable;
pub use handler::{AuthValidator, Handler, HandlerDelegate};
pub use message::{Codec, Message, RequestId};
#[cfg(feature = "msgpack")]
pub use message::MsgpackCodec;
pub use request::RequestFuture;
pub use server::{Server, ServerAuth, ServerState};
pub use socket::{Socket, SocketState, TransportKind};
pub use tls_config::{ProtocolVersion, TlsConfig, VerifyMode};
#[cfg(feature = "tls")]
pub use transport::tls::TlsConnectionInfo;
pub use ws_context::{WsAuthenticate, WsRequestContext, WsResponseContext};
