//! Six-byte message tags
//!
//! A tag is written raw on the wire (no length prefix) in front of every frame
//! body and every nested message.

use std::fmt;

use crate::error::CodecError;

/// Width of every tag on the wire
pub const TAG_LEN: usize = 6;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageTag([u8; TAG_LEN]);

impl MessageTag {
    pub const CLIENT_ID: MessageTag = MessageTag(*b"ClinID");
    pub const OBJECT_CHANGED: MessageTag = MessageTag(*b"ObjChg");
    pub const OBJECT_DELETE: MessageTag = MessageTag(*b"ObjDel");
    pub const OBJECT_INFO: MessageTag = MessageTag(*b"ObjInf");
    pub const REQUEST_OPTION: MessageTag = MessageTag(*b"ReqOpt");
    pub const RESPONSE: MessageTag = MessageTag(*b"Respns");
    pub const SYNC_REQUEST: MessageTag = MessageTag(*b"SynReq");

    /// Wrap raw bytes without validation (bytes read off the wire)
    pub const fn new(bytes: [u8; TAG_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }

    /// Registrable tags are printable ASCII without spaces
    pub fn is_printable(&self) -> bool {
        self.0.iter().all(|b| b.is_ascii_graphic())
    }
}

impl TryFrom<&str> for MessageTag {
    type Error = CodecError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes: [u8; TAG_LEN] = value
            .as_bytes()
            .try_into()
            .map_err(|_| CodecError::invalid_tag(value, "tags are exactly six bytes"))?;
        let tag = MessageTag(bytes);
        if !tag.is_printable() {
            return Err(CodecError::invalid_tag(value, "tags are printable ASCII"));
        }
        Ok(tag)
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageTag({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag() {
        assert_eq!(MessageTag::try_from("ClinID").unwrap(), MessageTag::CLIENT_ID);
        assert!(MessageTag::try_from("Short").is_err());
        assert!(MessageTag::try_from("TooLong!").is_err());
        assert!(MessageTag::try_from("Has sp").is_err());
    }

    #[test]
    fn test_display_escapes_binary() {
        let tag = MessageTag::new([b'A', 0, b'B', b'C', b'D', 0xff]);
        assert_eq!(tag.to_string(), "A\\x00BCD\\xff");
        assert_eq!(MessageTag::RESPONSE.to_string(), "Respns");
    }
}
