//! The RPC frame shape and the codec seam.
//!
//! The wire codec itself is an external collaborator: applications can bring
//! their own [`Codec`]. The bundled [`MsgpackCodec`] (behind the `msgpack`
//! feature) is a MessagePack-RPC-style convenience default, not a spec
//! requirement.

use crate::error::{Error, Result};

pub type RequestId = u64;

/// One whole RPC frame, already decoded from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// An outbound or inbound call expecting a `Response` with the same `id`.
    Request {
        id: RequestId,
        method: String,
        params: serde_json::Value,
    },
    /// Completes a previously received `Request`.
    Response {
        id: RequestId,
        result: std::result::Result<serde_json::Value, serde_json::Value>,
    },
    /// A fire-and-forget call; no response is expected or possible.
    Notify {
        method: String,
        params: serde_json::Value,
    },
}

impl Message {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Message::Request { id, .. } | Message::Response { id, .. } => Some(*id),
            Message::Notify { .. } => None,
        }
    }
}

/// The only contract the core has with the wire format: feed bytes in, get
/// whole messages out; serialize one message to a contiguous buffer.
///
/// A `Codec` is owned by a single connection and may keep partial-frame state
/// between calls to [`Codec::feed`].
pub trait Codec: Send + 'static {
    /// Consume newly-read bytes, returning every message that became whole.
    /// Bytes that don't yet form a complete message are retained internally.
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>>;

    /// Serialize one message to a contiguous buffer ready to write to the wire.
    fn serialize(&self, message: &Message) -> Result<Vec<u8>>;

    fn boxed_clone(&self) -> Box<dyn Codec>;
}

#[cfg(feature = "msgpack")]
mod msgpack {
    use super::*;
    use serde::{Deserialize, Serialize};

    /// `[0, id, method, params]` / `[1, id, error, result]` / `[2, method, params]`,
    /// the classic MessagePack-RPC envelope.
    ///
    /// Decoded generically as a `Vec<Value>` rather than an `untagged` enum:
    /// the request and response shapes are both 4-tuples and differ only in
    /// whether element 2 is a method name or an error value, which an
    /// `untagged` enum could confuse whenever an error happens to be a string.
    struct RawFrame(Vec<serde_json::Value>);

    impl Serialize for RawFrame {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            self.0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for RawFrame {
        fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
            Ok(RawFrame(Vec::deserialize(deserializer)?))
        }
    }

    impl RawFrame {
        fn from_message(msg: &Message) -> Self {
            RawFrame(match msg {
                Message::Request { id, method, params } => {
                    vec![0.into(), (*id).into(), method.clone().into(), params.clone()]
                },
                Message::Response { id, result } => match result {
                    Ok(value) => vec![1.into(), (*id).into(), serde_json::Value::Null, value.clone()],
                    Err(err) => vec![1.into(), (*id).into(), err.clone(), serde_json::Value::Null],
                },
                Message::Notify { method, params } => {
                    vec![2.into(), method.clone().into(), params.clone()]
                },
            })
        }

        fn into_message(self) -> Result<Message> {
            let malformed = || Error::Handshake("malformed msgpack-rpc frame".into());
            let mut v = self.0;
            let tag = v.first().and_then(|t| t.as_u64()).ok_or_else(malformed)?;
            match tag {
                0 if v.len() == 4 => {
                    let params = v.pop().unwrap();
                    let method = v.pop().unwrap().as_str().ok_or_else(malformed)?.to_owned();
                    let id = v[1].as_u64().ok_or_else(malformed)?;
                    Ok(Message::Request { id, method, params })
                },
                1 if v.len() == 4 => {
                    let result = v.pop().unwrap();
                    let error = v.pop().unwrap();
                    let id = v[1].as_u64().ok_or_else(malformed)?;
                    Ok(Message::Response {
                        id,
                        result: if error.is_null() { Ok(result) } else { Err(error) },
                    })
                },
                2 if v.len() == 3 => {
                    let params = v.pop().unwrap();
                    let method = v.pop().unwrap().as_str().ok_or_else(malformed)?.to_owned();
                    Ok(Message::Notify { method, params })
                },
                _ => Err(malformed()),
            }
        }
    }

    /// A `Codec` built on `rmp-serde`. Default for sockets that don't supply their own.
    #[derive(Default, Clone)]
    pub struct MsgpackCodec {
        buf: Vec<u8>,
    }

    impl Codec for MsgpackCodec {
        fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
            self.buf.extend_from_slice(bytes);
            let mut out = Vec::new();
            loop {
                let mut cursor = std::io::Cursor::new(&self.buf[..]);
                let mut de = rmp_serde::Deserializer::new(&mut cursor);
                match serde::Deserialize::deserialize(&mut de) {
                    Ok(frame) => {
                        let consumed = de.get_ref().position() as usize;
                        drop(de);
                        out.push(RawFrame::into_message(frame)?);
                        self.buf.drain(..consumed);
                    },
                    Err(_) => break,
                }
            }
            Ok(out)
        }

        fn serialize(&self, message: &Message) -> Result<Vec<u8>> {
            rmp_serde::to_vec(&RawFrame::from_message(message))
                .map_err(|err| Error::InvalidArgument(err.to_string().into_boxed_str()))
        }

        fn boxed_clone(&self) -> Box<dyn Codec> {
            Box::new(self.clone())
        }
    }
}

#[cfg(feature = "msgpack")]
pub use msgpack::MsgpackCodec;

#[cfg(test)]
mod test {
    use super::*;

    #[cfg(feature = "msgpack")]
    #[test]
    fn roundtrip_request_and_notify() {
        let mut codec = MsgpackCodec::default();
        let req = Message::Request {
            id: 7,
            method: "ping".into(),
            params: serde_json::json!([1, 2]),
        };
        let notify = Message::Notify {
            method: "tick".into(),
            params: serde_json::Value::Null,
        };
        let mut wire = codec.serialize(&req).unwrap();
        wire.extend(codec.serialize(&notify).unwrap());

        let decoded = codec.feed(&wire).unwrap();
        assert_eq!(decoded, vec![req, notify]);
    }

    #[cfg(feature = "msgpack")]
    #[test]
    fn feed_tolerates_partial_frames() {
        let mut codec = MsgpackCodec::default();
        let msg = Message::Notify {
            method: "partial".into(),
            params: serde_json::json!("hi"),
        };
        let wire = codec.serialize(&msg).unwrap();
        let (head, tail) = wire.split_at(wire.len() / 2);
        assert!(codec.feed(head).unwrap().is_empty());
        assert_eq!(codec.feed(tail).unwrap(), vec![msg]);
    }
}
