//! The application-facing callback surface and the delegate that owns both
//! the handler and the live sockets it was handed.

use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::message::Message;
use crate::socket::Socket;

/// Connect/disconnect/message callbacks. Default no-op bodies mean an
/// application only overrides what it cares about, the way the teacher's own
/// event-sink traits read.
pub trait Handler: Send + Sync + 'static {
    fn on_connect(&self, _socket: Socket) {}
    fn on_disconnect(&self, _socket: Socket, _reason: Error) {}
    fn on_message(&self, _socket: Socket, _message: Message) {}
}

/// Server-side Basic/Digest credential check.
///
/// `validate` answers Basic auth directly (it's given the cleartext
/// password). Digest auth never exposes a cleartext password to the server,
/// so `ha1` instead returns the htdigest-style precomputed `MD5(user:realm:pass)`
/// the application already stores, which the runtime uses to recompute and
/// compare the client's response.
pub trait AuthValidator: Send + Sync + 'static {
    fn validate(&self, username: &str, realm: &str, method: &str, uri: &str, password: &str) -> bool;

    fn ha1(&self, _username: &str, _realm: &str) -> Option<String> {
        None
    }
}

/// Owns the application handler and the set of sockets it was handed out.
///
/// The spec describes this as "holds a weak reference to the application
/// handler". A weak pointer that can dangle mid-dispatch is exactly what the
/// Design Notes ask us not to build; an `Arc<dyn Handler>` expresses the same
/// "the handler must outlive every socket it owns" contract safely, so
/// sockets hold a [`std::sync::Weak`] back to the delegate instead and the
/// delegate holds strong references to its sockets.
pub struct HandlerDelegate {
    handler: Arc<dyn Handler>,
    sockets: Mutex<Vec<Socket>>,
}

impl HandlerDelegate {
    pub fn new(handler: Arc<dyn Handler>) -> Arc<Self> {
        Arc::new(HandlerDelegate {
            handler,
            sockets: Mutex::new(Vec::new()),
        })
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn track(&self, socket: Socket) {
        let mut sockets = self.sockets.lock().unwrap();
        if !sockets.contains(&socket) {
            sockets.push(socket);
        }
    }

    pub fn untrack(&self, socket: &Socket) {
        self.sockets.lock().unwrap().retain(|s| s != socket);
    }

    pub fn sockets(&self) -> Vec<Socket> {
        self.sockets.lock().unwrap().clone()
    }
}
