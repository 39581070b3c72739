//! # Type Registry - bijective tag <-> message kind mapping
//!
//! ## Purpose
//!
//! Maps every six-byte wire tag to exactly one [`MessageKind`] and back.
//! Registration fails loudly on a collision in either direction. A kind with no
//! tag of its own can be aliased to another kind; `tag_of` then follows the
//! alias chain until it reaches a registered kind.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────────────┬───────────┬──────────────┐
//! │ length: u32  │ tag: [6]  │ body         │
//! │ big-endian   │ raw ASCII │ kind-specific│
//! └──────────────┴───────────┴──────────────┘
//!   length = 6 + body.len()
//! ```

use bytes::Bytes;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{CodecError, Result};
use crate::messages::{Message, MessageKind};
use crate::tag::{MessageTag, TAG_LEN};
use crate::wire::{WireReader, WireWriter};

/// Size of the frame length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Six object-model tags plus the request tag
pub const STANDARD_TAGS: [(MessageTag, MessageKind); 7] = [
    (MessageTag::CLIENT_ID, MessageKind::ClientId),
    (MessageTag::OBJECT_CHANGED, MessageKind::ObjectChanged),
    (MessageTag::OBJECT_DELETE, MessageKind::ObjectDelete),
    (MessageTag::OBJECT_INFO, MessageKind::ObjectInfo),
    (MessageTag::REQUEST_OPTION, MessageKind::RequestOption),
    (MessageTag::RESPONSE, MessageKind::Response),
    (MessageTag::SYNC_REQUEST, MessageKind::SyncRequest),
];

static STANDARD: Lazy<Arc<TypeRegistry>> = Lazy::new(|| Arc::new(TypeRegistry::standard()));

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    by_tag: HashMap<MessageTag, MessageKind>,
    by_kind: HashMap<MessageKind, MessageTag>,
    aliases: HashMap<MessageKind, MessageKind>,
}

impl TypeRegistry {
    /// Registry with nothing registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every [`STANDARD_TAGS`] entry
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for (tag, kind) in STANDARD_TAGS {
            registry.by_tag.insert(tag, kind);
            registry.by_kind.insert(kind, tag);
        }
        registry
    }

    /// Process-wide shared copy of [`TypeRegistry::standard`]
    pub fn shared_standard() -> Arc<TypeRegistry> {
        Arc::clone(&STANDARD)
    }

    /// Map `tag` to `kind`. Re-registering an identical pair is a no-op.
    pub fn register(&mut self, tag: MessageTag, kind: MessageKind) -> Result<()> {
        if !tag.is_printable() {
            return Err(CodecError::invalid_tag(tag.to_string(), "tags are printable ASCII"));
        }
        if let Some(&existing) = self.by_tag.get(&tag) {
            if existing == kind {
                return Ok(());
            }
            return Err(CodecError::TagCollision {
                tag,
                existing,
                new: kind,
            }
            .raise());
        }
        if let Some(existing) = self.by_kind.get(&kind) {
            return Err(CodecError::KindCollision {
                kind,
                existing: existing.to_string(),
                new: tag.to_string(),
            }
            .raise());
        }
        if let Some(target) = self.aliases.get(&kind) {
            return Err(CodecError::KindCollision {
                kind,
                existing: format!("alias of {:?}", target),
                new: tag.to_string(),
            }
            .raise());
        }

        debug!(%tag, ?kind, "Registered message tag");
        self.by_tag.insert(tag, kind);
        self.by_kind.insert(kind, tag);
        Ok(())
    }

    /// Encode `kind` under the tag of `target` (or of `target`'s own alias)
    pub fn register_alias(&mut self, kind: MessageKind, target: MessageKind) -> Result<()> {
        if let Some(existing) = self.by_kind.get(&kind) {
            return Err(CodecError::KindCollision {
                kind,
                existing: existing.to_string(),
                new: format!("alias of {:?}", target),
            }
            .raise());
        }
        if let Some(existing) = self.aliases.get(&kind) {
            if *existing == target {
                return Ok(());
            }
            return Err(CodecError::KindCollision {
                kind,
                existing: format!("alias of {:?}", existing),
                new: format!("alias of {:?}", target),
            }
            .raise());
        }
        self.aliases.insert(kind, target);
        Ok(())
    }

    pub fn tag_of(&self, message: &Message) -> Result<MessageTag> {
        self.tag_of_kind(message.kind())
    }

    /// Tag for `kind`, following aliases to the nearest registered kind
    pub fn tag_of_kind(&self, kind: MessageKind) -> Result<MessageTag> {
        let mut current = kind;
        // Bounded walk: an alias cycle ends as unregistered
        for _ in 0..=self.aliases.len() {
            if let Some(&tag) = self.by_kind.get(&current) {
                return Ok(tag);
            }
            match self.aliases.get(&current) {
                Some(&next) => current = next,
                None => break,
            }
        }
        Err(CodecError::Unregistered { kind }.raise())
    }

    pub fn kind_of(&self, tag: MessageTag) -> Result<MessageKind> {
        self.by_tag
            .get(&tag)
            .copied()
            .ok_or_else(|| CodecError::UnknownTag { tag }.raise())
    }

    pub fn is_registered(&self, tag: MessageTag) -> bool {
        self.by_tag.contains_key(&tag)
    }

    /// Construct the message `tag` names and decode its body from `reader`
    pub fn decode(&self, tag: MessageTag, reader: &mut WireReader<'_>) -> Result<Message> {
        let kind = self.kind_of(tag)?;
        Message::decode_body(kind, reader)
    }

    /// `[len:u32][tag][body]`, ready for a single write
    pub fn encode_frame(&self, message: &Message) -> Result<Bytes> {
        let mut writer = WireWriter::with_capacity(self, 64);
        writer.put_i32(0);
        writer.put_message(message)?;
        let mut frame = writer.into_inner();

        let payload_len = frame.len() - FRAME_HEADER_LEN;
        let len = u32::try_from(payload_len)
            .map_err(|_| CodecError::FrameTooLarge { size: payload_len })?;
        frame[..FRAME_HEADER_LEN].copy_from_slice(&len.to_be_bytes());
        Ok(frame.freeze())
    }

    /// Decode `[tag][body]` (a frame without its length prefix)
    pub fn decode_payload(&self, payload: &[u8]) -> Result<Message> {
        if payload.len() < TAG_LEN {
            return Err(CodecError::truncated(TAG_LEN, payload.len(), "frame tag"));
        }
        let mut reader = WireReader::new(payload, self);
        let message = reader.get_message()?;
        if reader.remaining() > 0 {
            warn!(
                kind = message.kind().name(),
                trailing = reader.remaining(),
                "Ignoring trailing bytes after message body"
            );
        }
        Ok(message)
    }
}
