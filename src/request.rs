//! The future returned by `Socket::send` for request/response correlation.

use std::sync::Weak;
use std::time::Duration;

use async_channel::Receiver;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::RequestId;
use crate::socket::SocketImpl;
use crate::util;

/// Resolves when the matching response arrives, the waiter times out, or the
/// socket disconnects before a response is seen. Wraps a channel rather than
/// implementing `Future` by hand, the same seam the teacher's own completion
/// handles use around `async-channel`.
pub struct RequestFuture {
    rx: Receiver<Result<Value>>,
    socket: Weak<SocketImpl>,
    id: RequestId,
}

impl RequestFuture {
    pub(crate) fn new(socket: Weak<SocketImpl>, id: RequestId, rx: Receiver<Result<Value>>) -> Self {
        RequestFuture { rx, socket, id }
    }

    /// Wait indefinitely for the response.
    pub async fn wait(self) -> Result<Value> {
        self.rx.recv().await.unwrap_or(Err(Error::NotConnected))
    }

    /// Wait up to `duration`; times out with [`Error::TimedOut`] and removes
    /// this waiter's own table entry, since no `Response` will ever arrive to
    /// clear it (spec §4.1: "Timed-out waiters complete with ETIMEDOUT and
    /// are removed").
    pub async fn wait_timeout(self, duration: Duration) -> Result<Value> {
        match util::timeout(duration, self.rx.recv()).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                if let Some(socket) = self.socket.upgrade() {
                    socket.remove_waiter(self.id);
                }
                Err(Error::TimedOut)
            },
        }
    }
}
