use std::fmt;

use super::{MessageKind, WireMessage};
use crate::error::Result;
use crate::wire::{WireReader, WireValue, WireWriter};

/// One selectable choice of a [`super::SyncRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestOption {
    pub name: String,
    pub id: i32,
    pub enabled: bool,
}

impl RequestOption {
    /// Answers the request by cancelling it; bound to the escape key
    pub const CANCEL_ID: i32 = -2;
    /// Neutral answer synthesized when nothing else is selectable
    pub const NO_ACTION_ID: i32 = 0;
    /// Visual separators; never selectable
    pub const SEPARATOR_ID: i32 = -1;
    /// Free-text answers outside the option list
    pub const CUSTOM_ID: i32 = -1;

    pub fn new(name: impl Into<String>, id: i32, enabled: bool) -> Self {
        Self {
            name: name.into(),
            id,
            enabled,
        }
    }

    /// Disabled visual separator
    pub fn separator() -> Self {
        Self::new("\n", Self::SEPARATOR_ID, false)
    }

    pub fn is_cancel(&self) -> bool {
        self.id == Self::CANCEL_ID
    }
}

impl WireMessage for RequestOption {
    const KIND: MessageKind = MessageKind::RequestOption;

    fn encode(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_str(&self.name)?;
        w.put_i32(self.id);
        w.put_bool(self.enabled);
        Ok(())
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let name = r.get_str()?;
        let id = r.get_i32()?;
        let enabled = r.get_bool()?;
        Ok(Self { name, id, enabled })
    }
}

/// Options travel in lists as tagged messages
impl WireValue for RequestOption {
    fn write_to(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_tagged(self)
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        r.get_tagged()
    }
}

impl fmt::Display for RequestOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.name)?;
        if !self.enabled {
            f.write_str(" (disabled)")?;
        }
        Ok(())
    }
}
