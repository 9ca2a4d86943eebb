//! The common connection state machine (spec §4.1) shared by all four
//! transport kinds, plus the thin per-transport connect/accept wrappers.

mod connect;
mod io_loop;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_channel::Sender as ChanSender;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::handler::HandlerDelegate;
use crate::message::{Codec, Message, RequestId};
use crate::request::RequestFuture;
use crate::tls_config::TlsConfig;
use crate::util::ensure;
use crate::ws_context::{WsRequestContext, WsResponseContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Ssl,
    Ws,
    Wss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Disconnecting,
}

/// An operation issued by application code while the socket is inside one of
/// its own callback invocations. Applied once the callback returns, per the
/// Design Notes re-entrancy rule (the loop must not recurse into its own
/// state machine mid-dispatch).
enum DeferredOp {
    Connect { timeout: Option<Duration> },
    Disconnect,
}

pub(crate) struct Waiter {
    tx: ChanSender<Result<Value>>,
}

/// Everything mutated by both the loop thread and foreign callers, behind one
/// short lock (spec §5: "a short mutex inside SocketImpl guards the state
/// variable, the send queue head/tail, and the waiter table... all actual I/O
/// runs lock-free on the loop").
pub(crate) struct Inner {
    pub state: SocketState,
    pub write_tx: Option<ChanSender<Message>>,
    pub shutdown_tx: Option<ChanSender<()>>,
    pub waiters: HashMap<RequestId, Waiter>,
    pub in_callback: bool,
    pub deferred: Vec<DeferredOp>,
    pub ws_response: Option<WsResponseContext>,
    pub group_names: std::collections::HashSet<String>,
    /// Bumped every time a new connect attempt begins and every time a
    /// `Disconnect` cancels one still in flight. A connect task captures the
    /// value in effect when it started; if it no longer matches by the time
    /// the task would commit to CONNECTED, the task has been superseded and
    /// discards its result instead of firing a phantom `OnConnect`.
    pub epoch: u64,
    #[cfg(feature = "tls")]
    pub tls_info: Option<crate::transport::tls::TlsConnectionInfo>,
}

pub struct SocketImpl {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    pub bind_iface: Option<String>,
    pub tls_config: Option<TlsConfig>,
    pub ws_request: Option<WsRequestContext>,
    pub(crate) codec_factory: Arc<dyn Fn() -> Box<dyn Codec> + Send + Sync>,
    pub(crate) delegate: Mutex<Option<Weak<HandlerDelegate>>>,
    pub(crate) loop_: EventLoop,
    next_request_id: AtomicU64,
    pub(crate) inner: Mutex<Inner>,
    pub(crate) codec: Mutex<Option<Box<dyn Codec>>>,
}

impl SocketImpl {
    pub(crate) fn new(
        transport: TransportKind,
        host: String,
        port: u16,
        bind_iface: Option<String>,
        tls_config: Option<TlsConfig>,
        ws_request: Option<WsRequestContext>,
        codec_factory: Arc<dyn Fn() -> Box<dyn Codec> + Send + Sync>,
        loop_: EventLoop,
    ) -> Arc<Self> {
        Arc::new(SocketImpl {
            transport,
            host,
            port,
            bind_iface,
            tls_config,
            ws_request,
            codec_factory,
            delegate: Mutex::new(None),
            loop_,
            next_request_id: AtomicU64::new(1),
            inner: Mutex::new(Inner {
                state: SocketState::Disconnected,
                write_tx: None,
                shutdown_tx: None,
                waiters: HashMap::new(),
                in_callback: false,
                deferred: Vec::new(),
                ws_response: None,
                group_names: std::collections::HashSet::new(),
                epoch: 0,
                #[cfg(feature = "tls")]
                tls_info: None,
            }),
            codec: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SocketState {
        self.inner.lock().unwrap().state
    }

    pub(crate) fn delegate(&self) -> Option<Arc<HandlerDelegate>> {
        self.delegate.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_delegate(&self, delegate: &Arc<HandlerDelegate>) {
        *self.delegate.lock().unwrap() = Some(Arc::downgrade(delegate));
    }

    /// Run `f` while marking the socket "in callback", then apply whatever
    /// `Connect`/`Disconnect` the callback itself issued re-entrantly.
    pub(crate) fn dispatch_callback(self: &Arc<Self>, f: impl FnOnce()) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.in_callback = true;
        }
        f();
        let deferred: Vec<DeferredOp> = {
            let mut inner = self.inner.lock().unwrap();
            inner.in_callback = false;
            std::mem::take(&mut inner.deferred)
        };
        for op in deferred {
            match op {
                DeferredOp::Connect { timeout } => self.start_connect(timeout),
                DeferredOp::Disconnect => {
                    let this = self.clone();
                    self.loop_.post(async move {
                        io_loop::begin_disconnect(this).await;
                    });
                },
            }
        }
    }

    pub fn connect(self: &Arc<Self>) -> Result<()> {
        self.connect_with_timeout(None)
    }

    pub fn connect_with_timeout(self: &Arc<Self>, timeout: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.in_callback {
            ensure_idle(&inner)?;
            drop(inner);
            crate::transport::tcp::check_bind_iface(self.bind_iface.as_deref())?;
            self.inner.lock().unwrap().deferred.push(DeferredOp::Connect { timeout });
            return Ok(());
        }
        ensure_idle(&inner)?;
        drop(inner);
        crate::transport::tcp::check_bind_iface(self.bind_iface.as_deref())?;
        self.start_connect(timeout);
        Ok(())
    }

    /// Transition into CONNECTING, mint a fresh generation for this attempt,
    /// and post the connect task tagged with it.
    fn start_connect(self: &Arc<Self>, timeout: Option<Duration>) {
        let generation = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = SocketState::Connecting;
            inner.epoch += 1;
            inner.epoch
        };
        let this = self.clone();
        self.loop_.post(async move {
            connect::begin_connect(this, timeout, generation).await;
        });
    }

    pub fn disconnect(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.in_callback {
            if inner.state == SocketState::Disconnected {
                return Err(Error::AlreadyInProgress);
            }
            inner.deferred.push(DeferredOp::Disconnect);
            return Ok(());
        }
        if inner.state == SocketState::Disconnected {
            return Err(Error::AlreadyInProgress);
        }
        drop(inner);

        let this = self.clone();
        self.loop_.post(async move {
            io_loop::begin_disconnect(this).await;
        });
        Ok(())
    }

    pub fn send(self: &Arc<Self>, message: Message) -> Result<Option<RequestFuture>> {
        let mut inner = self.inner.lock().unwrap();
        ensure!(inner.state == SocketState::Connected, Error::NotConnected);

        let message = match message {
            Message::Request { method, params, .. } => {
                let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = async_channel::bounded(1);
                inner.waiters.insert(id, Waiter { tx });
                let fut = RequestFuture::new(Arc::downgrade(self), id, rx);
                let write_tx = inner.write_tx.clone().ok_or(Error::NotConnected)?;
                drop(inner);
                write_tx
                    .try_send(Message::Request { id, method, params })
                    .map_err(|_| Error::NotConnected)?;
                return Ok(Some(fut));
            },
            other => other,
        };

        let write_tx = inner.write_tx.clone().ok_or(Error::NotConnected)?;
        drop(inner);
        write_tx.try_send(message).map_err(|_| Error::NotConnected)?;
        Ok(None)
    }

    pub fn join_group(self: &Arc<Self>, name: &str) {
        self.inner.lock().unwrap().group_names.insert(name.to_string());
        self.loop_.groups().join(name, Socket(self.clone()));
    }

    pub fn leave_group(self: &Arc<Self>, name: &str) {
        self.inner.lock().unwrap().group_names.remove(name);
        self.loop_.groups().leave(name, &Socket(self.clone()));
    }

    pub(crate) fn leave_all_groups(self: &Arc<Self>) {
        let names: Vec<String> = std::mem::take(&mut self.inner.lock().unwrap().group_names).into_iter().collect();
        let handle = Socket(self.clone());
        for name in names {
            self.loop_.groups().leave(&name, &handle);
        }
    }

    pub fn ws_response_context(&self) -> Option<WsResponseContext> {
        self.inner.lock().unwrap().ws_response.clone()
    }

    /// Drop a waiter that timed out client-side (spec §4.1: "Timed-out
    /// waiters complete with ETIMEDOUT and are removed"). A no-op if the
    /// response arrived concurrently and already removed the same entry.
    pub(crate) fn remove_waiter(&self, id: RequestId) {
        self.inner.lock().unwrap().waiters.remove(&id);
    }

    #[cfg(feature = "tls")]
    pub fn tls_connection_info(&self) -> Option<crate::transport::tls::TlsConnectionInfo> {
        self.inner.lock().unwrap().tls_info.clone()
    }
}

fn ensure_idle(inner: &Inner) -> Result<()> {
    match inner.state {
        SocketState::Disconnected => Ok(()),
        _ => Err(Error::AlreadyInProgress),
    }
}

/// The public value-type handle. Equality is by `SocketImpl` identity, so it
/// survives reconnects: the same handle can be `Connect()`-ed again to start
/// a new epoch without losing the identity tests key off of.
#[derive(Clone)]
pub struct Socket(pub(crate) Arc<SocketImpl>);

impl Socket {
    pub(crate) fn from_impl(inner: Arc<SocketImpl>) -> Self {
        Socket(inner)
    }

    pub fn connect(&self) -> Result<()> {
        self.0.connect()
    }

    pub fn connect_timeout(&self, timeout: Duration) -> Result<()> {
        self.0.connect_with_timeout(Some(timeout))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.0.disconnect()
    }

    pub fn send(&self, message: Message) -> Result<Option<RequestFuture>> {
        self.0.send(message)
    }

    pub fn state(&self) -> SocketState {
        self.0.state()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.0.transport
    }

    pub fn peer_addr(&self) -> (&str, u16) {
        (&self.0.host, self.0.port)
    }

    pub fn join_group(&self, name: &str) {
        self.0.join_group(name)
    }

    pub fn leave_group(&self, name: &str) {
        self.0.leave_group(name)
    }

    pub fn ws_response_context(&self) -> Option<WsResponseContext> {
        self.0.ws_response_context()
    }

    #[cfg(feature = "tls")]
    pub fn tls_connection_info(&self) -> Option<crate::transport::tls::TlsConnectionInfo> {
        self.0.tls_connection_info()
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Socket {}

impl Hash for Socket {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("transport", &self.0.transport)
            .field("peer", &(&self.0.host, self.0.port))
            .field("state", &self.0.state())
            .finish()
    }
}
