//! Message types
//!
//! A closed set of tagged variants. Each concrete type implements
//! [`WireMessage`]; [`Message`] wraps them for polymorphic fields, lists and
//! frames.

mod client_id;
mod object;
mod request_option;
mod response;
pub mod sync_request;

use std::fmt;

use crate::error::Result;
use crate::wire::{WireReader, WireWriter};

pub use client_id::ClientId;
pub use object::{ObjectChanged, ObjectDelete, ObjectInfo};
pub use request_option::RequestOption;
pub use response::Response;
pub use sync_request::{Key, KeyPress, SyncRequest};

/// A concrete message type with its own body encoding
pub trait WireMessage: Sized {
    const KIND: MessageKind;

    /// Body only; the tag is written by the caller
    fn encode(&self, w: &mut WireWriter<'_>) -> Result<()>;

    fn decode(r: &mut WireReader<'_>) -> Result<Self>;
}

/// Runtime identity of a message variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    ClientId,
    ObjectChanged,
    ObjectDelete,
    ObjectInfo,
    RequestOption,
    Response,
    SyncRequest,
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::ClientId => "ClientId",
            MessageKind::ObjectChanged => "ObjectChanged",
            MessageKind::ObjectDelete => "ObjectDelete",
            MessageKind::ObjectInfo => "ObjectInfo",
            MessageKind::RequestOption => "RequestOption",
            MessageKind::Response => "Response",
            MessageKind::SyncRequest => "SyncRequest",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientId(ClientId),
    ObjectChanged(ObjectChanged),
    ObjectDelete(ObjectDelete),
    ObjectInfo(ObjectInfo),
    RequestOption(RequestOption),
    Response(Response),
    SyncRequest(SyncRequest),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ClientId(_) => MessageKind::ClientId,
            Message::ObjectChanged(_) => MessageKind::ObjectChanged,
            Message::ObjectDelete(_) => MessageKind::ObjectDelete,
            Message::ObjectInfo(_) => MessageKind::ObjectInfo,
            Message::RequestOption(_) => MessageKind::RequestOption,
            Message::Response(_) => MessageKind::Response,
            Message::SyncRequest(_) => MessageKind::SyncRequest,
        }
    }

    pub fn encode_body(&self, w: &mut WireWriter<'_>) -> Result<()> {
        match self {
            Message::ClientId(m) => m.encode(w),
            Message::ObjectChanged(m) => m.encode(w),
            Message::ObjectDelete(m) => m.encode(w),
            Message::ObjectInfo(m) => m.encode(w),
            Message::RequestOption(m) => m.encode(w),
            Message::Response(m) => m.encode(w),
            Message::SyncRequest(m) => m.encode(w),
        }
    }

    pub fn decode_body(kind: MessageKind, r: &mut WireReader<'_>) -> Result<Message> {
        Ok(match kind {
            MessageKind::ClientId => Message::ClientId(ClientId::decode(r)?),
            MessageKind::ObjectChanged => Message::ObjectChanged(ObjectChanged::decode(r)?),
            MessageKind::ObjectDelete => Message::ObjectDelete(ObjectDelete::decode(r)?),
            MessageKind::ObjectInfo => Message::ObjectInfo(ObjectInfo::decode(r)?),
            MessageKind::RequestOption => Message::RequestOption(RequestOption::decode(r)?),
            MessageKind::Response => Message::Response(Response::decode(r)?),
            MessageKind::SyncRequest => Message::SyncRequest(SyncRequest::decode(r)?),
        })
    }

    /// Correlation key of a reply-capable message
    pub fn sync_key(&self) -> Option<i32> {
        match self {
            Message::Response(m) => Some(m.sync_key),
            Message::SyncRequest(m) => Some(m.sync_key()),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::ClientId(m) => fmt::Display::fmt(m, f),
            Message::ObjectChanged(m) => fmt::Display::fmt(m, f),
            Message::ObjectDelete(m) => fmt::Display::fmt(m, f),
            Message::ObjectInfo(m) => fmt::Display::fmt(m, f),
            Message::RequestOption(m) => fmt::Display::fmt(m, f),
            Message::Response(m) => fmt::Display::fmt(m, f),
            Message::SyncRequest(m) => fmt::Display::fmt(m, f),
        }
    }
}

macro_rules! message_from {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Message {
                fn from(value: $variant) -> Self {
                    Message::$variant(value)
                }
            }
        )*
    };
}

message_from!(
    ClientId,
    ObjectChanged,
    ObjectDelete,
    ObjectInfo,
    RequestOption,
    Response,
    SyncRequest
);
