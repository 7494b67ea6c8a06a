// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain envelope and payload types.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::proto;

/// Kind of message carried by an [`Envelope`].
///
/// `EarlyReply` and `EarlyExit` are provisional and may be removed; match on
/// this enum with a wildcard arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum MessageKind {
    /// No type set on the wire (or an unknown value)
    Undefined,
    /// Successful result carrying a payload
    Ok,
    /// Pipeline failure carrying an error message
    Error,
    /// Provisional early reply carrying a payload
    EarlyReply,
    /// Provisional early exit carrying a payload
    EarlyExit,
}

impl MessageKind {
    /// Whether envelopes of this kind carry a payload.
    pub fn carries_payload(self) -> bool {
        matches!(
            self,
            MessageKind::Ok | MessageKind::EarlyReply | MessageKind::EarlyExit
        )
    }
}

impl From<proto::MessageType> for MessageKind {
    fn from(value: proto::MessageType) -> Self {
        match value {
            proto::MessageType::Undefined => MessageKind::Undefined,
            proto::MessageType::Ok => MessageKind::Ok,
            proto::MessageType::Error => MessageKind::Error,
            proto::MessageType::EarlyReply => MessageKind::EarlyReply,
            proto::MessageType::EarlyExit => MessageKind::EarlyExit,
        }
    }
}

impl From<i32> for MessageKind {
    fn from(value: i32) -> Self {
        proto::MessageType::try_from(value)
            .map(MessageKind::from)
            .unwrap_or(MessageKind::Undefined)
    }
}

impl From<MessageKind> for proto::MessageType {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Undefined => proto::MessageType::Undefined,
            MessageKind::Ok => proto::MessageType::Ok,
            MessageKind::Error => proto::MessageType::Error,
            MessageKind::EarlyReply => proto::MessageType::EarlyReply,
            MessageKind::EarlyExit => proto::MessageType::EarlyExit,
        }
    }
}

/// Opaque user payload: serialized bytes plus a type tag.
///
/// The SDK never looks inside `value`; the tag is for the receiving node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    type_url: String,
    value: Bytes,
}

impl Payload {
    /// Create a payload from a type tag and serialized bytes.
    pub fn new(type_url: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            type_url: type_url.into(),
            value: value.into(),
        }
    }

    /// Create an untagged payload from raw bytes.
    pub fn raw(value: impl Into<Bytes>) -> Self {
        Self::new(String::new(), value)
    }

    /// Serialize a value as JSON under the given type tag.
    pub fn json<T: Serialize + ?Sized>(type_url: impl Into<String>, value: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::new(type_url, bytes))
    }

    /// Deserialize the payload bytes as JSON.
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.value)?)
    }

    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Consume the payload, returning the serialized bytes.
    pub fn into_value(self) -> Bytes {
        self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl From<proto::Payload> for Payload {
    fn from(payload: proto::Payload) -> Self {
        Self {
            type_url: payload.type_url,
            value: Bytes::from(payload.value),
        }
    }
}

impl From<&Payload> for proto::Payload {
    fn from(payload: &Payload) -> Self {
        proto::Payload {
            type_url: payload.type_url.clone(),
            value: payload.value.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    Undefined,
    Ok(Payload),
    Error(String),
    EarlyReply(Payload),
    EarlyExit(Payload),
}

/// Error text used when an ERROR envelope arrives without a message.
const UNSPECIFIED_ERROR: &str = "unspecified error";

/// The canonical inter-node message.
///
/// An envelope is immutable. The payload is present exactly for
/// `Ok`, `EarlyReply` and `EarlyExit`; the error text is present (and
/// non-empty) exactly for `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    request_id: String,
    from_node: String,
    body: Body,
}

impl Envelope {
    /// Successful result.
    pub fn ok(
        request_id: impl Into<String>,
        from_node: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::with_body(request_id, from_node, Body::Ok(payload))
    }

    /// Pipeline failure. An empty message is replaced so the error text
    /// is never blank.
    pub fn error(
        request_id: impl Into<String>,
        from_node: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = UNSPECIFIED_ERROR.to_string();
        }
        Self::with_body(request_id, from_node, Body::Error(message))
    }

    pub fn early_reply(
        request_id: impl Into<String>,
        from_node: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::with_body(request_id, from_node, Body::EarlyReply(payload))
    }

    pub fn early_exit(
        request_id: impl Into<String>,
        from_node: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self::with_body(request_id, from_node, Body::EarlyExit(payload))
    }

    fn with_body(request_id: impl Into<String>, from_node: impl Into<String>, body: Body) -> Self {
        Self {
            request_id: request_id.into(),
            from_node: from_node.into(),
            body,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn from_node(&self) -> &str {
        &self.from_node
    }

    pub fn kind(&self) -> MessageKind {
        match self.body {
            Body::Undefined => MessageKind::Undefined,
            Body::Ok(_) => MessageKind::Ok,
            Body::Error(_) => MessageKind::Error,
            Body::EarlyReply(_) => MessageKind::EarlyReply,
            Body::EarlyExit(_) => MessageKind::EarlyExit,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.body {
            Body::Ok(p) | Body::EarlyReply(p) | Body::EarlyExit(p) => Some(p),
            Body::Undefined | Body::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.body {
            Body::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, Body::Error(_))
    }

    /// Consume the envelope, returning its payload if it carries one.
    pub fn into_payload(self) -> Option<Payload> {
        match self.body {
            Body::Ok(p) | Body::EarlyReply(p) | Body::EarlyExit(p) => Some(p),
            Body::Undefined | Body::Error(_) => None,
        }
    }

    /// Convert to the wire representation.
    pub fn to_proto(&self) -> proto::Envelope {
        proto::Envelope {
            request_id: self.request_id.clone(),
            payload: self.payload().map(proto::Payload::from),
            error: self.error_message().unwrap_or_default().to_string(),
            from_node: self.from_node.clone(),
            message_type: proto::MessageType::from(self.kind()) as i32,
        }
    }
}

/// Wire envelopes are normalized on the way in: a payload-carrying type with
/// no payload gets an empty one, an ERROR with no text gets a placeholder,
/// and stray fields that contradict the type are dropped.
impl From<proto::Envelope> for Envelope {
    fn from(wire: proto::Envelope) -> Self {
        let kind = MessageKind::from(wire.message_type);
        let payload = || wire.payload.clone().map(Payload::from).unwrap_or_default();
        let body = match kind {
            MessageKind::Ok => Body::Ok(payload()),
            MessageKind::EarlyReply => Body::EarlyReply(payload()),
            MessageKind::EarlyExit => Body::EarlyExit(payload()),
            MessageKind::Error if wire.error.is_empty() => {
                Body::Error(UNSPECIFIED_ERROR.to_string())
            }
            MessageKind::Error => Body::Error(wire.error.clone()),
            MessageKind::Undefined => Body::Undefined,
        };
        Self {
            request_id: wire.request_id,
            from_node: wire.from_node,
            body,
        }
    }
}

/// Mint a new globally unique request id.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
