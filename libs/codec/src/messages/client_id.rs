use std::fmt;

use super::{MessageKind, WireMessage};
use crate::error::Result;
use crate::wire::{WireReader, WireWriter};

/// Identifier assigned to a client on connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    pub id: i32,
}

impl ClientId {
    pub fn new(id: i32) -> Self {
        Self { id }
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self { id: -1 }
    }
}

impl WireMessage for ClientId {
    const KIND: MessageKind = MessageKind::ClientId;

    fn encode(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_i32(self.id);
        Ok(())
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self { id: r.get_i32()? })
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientID: {}", self.id)
    }
}
