//! The read/write tasks that run once a socket reaches `CONNECTED`, plus the
//! connect/disconnect/message dispatch into application callbacks.

use std::sync::Arc;

use async_channel::{Receiver, Sender};
use async_tungstenite::tungstenite::Message as WsMessage;
use async_tungstenite::WebSocketStream;
use futures::io::{ReadHalf, WriteHalf};
use futures::{AsyncReadExt, AsyncWriteExt, SinkExt, StreamExt};

use crate::error::Error;
use crate::message::{Codec, Message};
use crate::transport::BoxedStream;

use super::{Socket, SocketImpl, SocketState};

enum ReadEvent {
    Data(usize),
    Eof,
    Shutdown,
}

async fn wait_for_shutdown(rx: Receiver<()>) -> ReadEvent {
    let _ = rx.recv().await;
    ReadEvent::Shutdown
}

pub(crate) fn spawn_raw(socket: Arc<SocketImpl>, stream: BoxedStream) {
    let (read_half, write_half) = stream.split();
    let (write_tx, write_rx) = async_channel::unbounded::<Message>();
    let (shutdown_tx, shutdown_rx) = async_channel::bounded::<()>(1);

    {
        let mut inner = socket.inner.lock().unwrap();
        inner.write_tx = Some(write_tx);
        inner.shutdown_tx = Some(shutdown_tx);
    }
    *socket.codec.lock().unwrap() = Some((socket.codec_factory)());

    let reader_socket = socket.clone();
    socket
        .loop_
        .post(async move { reader_task_raw(reader_socket, read_half, shutdown_rx).await });

    let writer_socket = socket.clone();
    socket
        .loop_
        .post(async move { writer_task_raw(writer_socket, write_half, write_rx).await });
}

async fn reader_task_raw(socket: Arc<SocketImpl>, mut reader: ReadHalf<BoxedStream>, shutdown_rx: Receiver<()>) {
    let mut buf = vec![0u8; 8192];
    loop {
        let read_fut = async {
            match reader.read(&mut buf).await {
                Ok(0) => ReadEvent::Eof,
                Ok(n) => ReadEvent::Data(n),
                Err(_) => ReadEvent::Eof,
            }
        };
        match futures_lite::future::or(read_fut, wait_for_shutdown(shutdown_rx.clone())).await {
            ReadEvent::Shutdown => {
                finalize(&socket, Error::Closed);
                return;
            },
            ReadEvent::Eof => {
                finalize(&socket, Error::Eof);
                return;
            },
            ReadEvent::Data(n) => {
                let fed = {
                    let mut codec = socket.codec.lock().unwrap();
                    codec.as_mut().expect("codec set at connect").feed(&buf[..n])
                };
                match fed {
                    Ok(messages) => {
                        for msg in messages {
                            dispatch_inbound(&socket, msg);
                        }
                    },
                    Err(err) => {
                        finalize(&socket, err);
                        return;
                    },
                }
            },
        }
    }
}

async fn writer_task_raw(socket: Arc<SocketImpl>, mut writer: WriteHalf<BoxedStream>, rx: Receiver<Message>) {
    while let Ok(msg) = rx.recv().await {
        let bytes = {
            let codec = socket.codec.lock().unwrap();
            codec.as_ref().expect("codec set at connect").serialize(&msg)
        };
        let Ok(bytes) = bytes else { continue };
        if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
}

pub(crate) fn spawn_ws<S>(socket: Arc<SocketImpl>, stream: WebSocketStream<S>)
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = stream.split();
    let (write_tx, write_rx) = async_channel::unbounded::<Message>();
    let (shutdown_tx, shutdown_rx) = async_channel::bounded::<()>(1);

    {
        let mut inner = socket.inner.lock().unwrap();
        inner.write_tx = Some(write_tx);
        inner.shutdown_tx = Some(shutdown_tx);
    }
    *socket.codec.lock().unwrap() = Some((socket.codec_factory)());

    let reader_socket = socket.clone();
    socket.loop_.post(async move {
        enum Event {
            Frame(Option<Result<WsMessage, async_tungstenite::tungstenite::Error>>),
            Shutdown,
        }
        loop {
            let next = futures_lite::future::or(async { Event::Frame(source.next().await) }, async {
                let _ = shutdown_rx.recv().await;
                Event::Shutdown
            })
            .await;
            match next {
                Event::Shutdown => {
                    finalize(&reader_socket, Error::Closed);
                    return;
                },
                Event::Frame(None) => {
                    finalize(&reader_socket, Error::Eof);
                    return;
                },
                Event::Frame(Some(Err(_))) => {
                    finalize(&reader_socket, Error::Eof);
                    return;
                },
                Event::Frame(Some(Ok(WsMessage::Close(_)))) => {
                    finalize(&reader_socket, Error::Eof);
                    return;
                },
                Event::Frame(Some(Ok(WsMessage::Binary(bytes)))) => {
                    let fed = {
                        let mut codec = reader_socket.codec.lock().unwrap();
                        codec.as_mut().expect("codec set at connect").feed(&bytes)
                    };
                    match fed {
                        Ok(messages) => {
                            for msg in messages {
                                dispatch_inbound(&reader_socket, msg);
                            }
                        },
                        Err(err) => {
                            finalize(&reader_socket, err);
                            return;
                        },
                    }
                },
                Event::Frame(Some(Ok(_))) => {
                    // Ping/Pong/Text frames carry no RPC payload in this protocol.
                },
            }
        }
    });

    let writer_socket = socket.clone();
    socket.loop_.post(async move {
        while let Ok(msg) = write_rx.recv().await {
            let bytes = {
                let codec = writer_socket.codec.lock().unwrap();
                codec.as_ref().expect("codec set at connect").serialize(&msg)
            };
            let Ok(bytes) = bytes else { continue };
            if sink.send(WsMessage::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });
}

fn dispatch_inbound(socket: &Arc<SocketImpl>, message: Message) {
    match &message {
        Message::Response { id, result } => {
            let waiter = socket.inner.lock().unwrap().waiters.remove(id);
            if let Some(waiter) = waiter {
                let result = result.clone().map_err(error_from_rpc_value);
                let _ = waiter.tx.try_send(result);
            }
        },
        Message::Request { .. } | Message::Notify { .. } => {
            let Some(delegate) = socket.delegate() else { return };
            let handle = Socket(socket.clone());
            socket.dispatch_callback(|| delegate.handler().on_message(handle, message.clone()));
        },
    }
}

fn error_from_rpc_value(value: serde_json::Value) -> Error {
    Error::Handshake(value.to_string().into_boxed_str())
}

pub(crate) fn fire_connect(socket: &Arc<SocketImpl>) {
    let Some(delegate) = socket.delegate() else { return };
    let handle = Socket(socket.clone());
    delegate.track(handle.clone());
    socket.dispatch_callback(|| delegate.handler().on_connect(handle));
}

pub(crate) fn fire_disconnect(socket: &Arc<SocketImpl>, reason: Error) {
    socket.leave_all_groups();
    let waiters: Vec<_> = std::mem::take(&mut socket.inner.lock().unwrap().waiters).into_iter().collect();
    for (_, waiter) in waiters {
        let _ = waiter.tx.try_send(Err(Error::NotConnected));
    }
    {
        let mut inner = socket.inner.lock().unwrap();
        inner.write_tx = None;
        inner.shutdown_tx = None;
        inner.ws_response = None;
    }

    let Some(delegate) = socket.delegate() else { return };
    let handle = Socket(socket.clone());
    delegate.untrack(&handle);
    socket.dispatch_callback(|| delegate.handler().on_disconnect(handle, reason));
}

fn finalize(socket: &Arc<SocketImpl>, reason: Error) {
    let already_done = {
        let mut inner = socket.inner.lock().unwrap();
        let done = inner.state == SocketState::Disconnected;
        inner.state = SocketState::Disconnected;
        done
    };
    if !already_done {
        fire_disconnect(socket, reason);
    }
}

pub(crate) async fn begin_disconnect(socket: Arc<SocketImpl>) {
    let shutdown_tx = {
        let mut inner = socket.inner.lock().unwrap();
        if inner.state == SocketState::Disconnected {
            return;
        }
        inner.state = SocketState::Disconnecting;
        inner.shutdown_tx.clone()
    };
    if let Some(tx) = shutdown_tx {
        let _ = tx.send(()).await;
    } else {
        // No connection ever reached the I/O stage (still CONNECTING/HANDSHAKING).
        // Bump the generation so the in-flight connect task, which captured
        // the prior value, recognizes it has been superseded and discards
        // its eventual result instead of completing into CONNECTED.
        socket.inner.lock().unwrap().epoch += 1;
        finalize(&socket, Error::Closed);
    }
}
