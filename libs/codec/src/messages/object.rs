//! Object lifecycle notifications
//!
//! Each wraps arbitrary nested messages, written as `[tag][body]`.

use std::fmt;

use super::{Message, MessageKind, WireMessage};
use crate::error::Result;
use crate::wire::{WireReader, WireWriter};

/// An object before and after a change
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectChanged {
    pub original: Box<Message>,
    pub modified: Box<Message>,
}

impl ObjectChanged {
    pub fn new(original: impl Into<Message>, modified: impl Into<Message>) -> Self {
        Self {
            original: Box::new(original.into()),
            modified: Box::new(modified.into()),
        }
    }
}

impl WireMessage for ObjectChanged {
    const KIND: MessageKind = MessageKind::ObjectChanged;

    fn encode(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_message(&self.original)?;
        w.put_message(&self.modified)
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let original = r.get_message()?;
        let modified = r.get_message()?;
        Ok(Self::new(original, modified))
    }
}

impl fmt::Display for ObjectChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectChanged: original=[{}], modified=[{}]",
            self.original, self.modified
        )
    }
}

/// An object that has been removed
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDelete {
    pub object: Box<Message>,
}

impl ObjectDelete {
    pub fn new(object: impl Into<Message>) -> Self {
        Self {
            object: Box::new(object.into()),
        }
    }
}

impl WireMessage for ObjectDelete {
    const KIND: MessageKind = MessageKind::ObjectDelete;

    fn encode(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_message(&self.object)
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self::new(r.get_message()?))
    }
}

impl fmt::Display for ObjectDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectDelete: [{}]", self.object)
    }
}

/// Full state of an object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub object: Box<Message>,
}

impl ObjectInfo {
    pub fn new(object: impl Into<Message>) -> Self {
        Self {
            object: Box::new(object.into()),
        }
    }
}

impl WireMessage for ObjectInfo {
    const KIND: MessageKind = MessageKind::ObjectInfo;

    fn encode(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_message(&self.object)
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self::new(r.get_message()?))
    }
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectInfo: [{}]", self.object)
    }
}
