//! Codec errors for tagged message encoding and decoding
//!
//! Errors split into two classes. Fatal errors (unknown tag, registry
//! collisions, unregistered kinds, duplicate enabled options, runaway nesting) indicate a
//! protocol or programming defect: they are handed to the fatal hook when
//! raised and must abort the operation. Everything else is an ordinary
//! decode/encode failure: the caller logs it and abandons the message.

use thiserror::Error;

use crate::messages::MessageKind;
use crate::tag::MessageTag;

/// Wire codec errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Input ended before a value could be read
    #[error("Truncated input: need {need} bytes, {remaining} remaining (reading {context})")]
    Truncated {
        need: usize,
        remaining: usize,
        context: &'static str,
    },

    /// String does not fit a 16-bit length prefix
    #[error("String of {len} bytes exceeds the 16-bit length prefix")]
    StringTooLong { len: usize },

    /// List does not fit a 16-bit count prefix
    #[error("List of {len} elements exceeds the 16-bit count prefix")]
    ListTooLong { len: usize },

    /// Tag text is not exactly six printable ASCII characters
    #[error("Invalid message tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: &'static str },

    /// Tag already registered for a different kind
    #[error("Tag {tag} already registered for {existing:?}, cannot register {new:?}")]
    TagCollision {
        tag: MessageTag,
        existing: MessageKind,
        new: MessageKind,
    },

    /// Kind already registered (or aliased) under a different tag
    #[error("Kind {kind:?} already mapped to {existing}, cannot map to {new}")]
    KindCollision {
        kind: MessageKind,
        existing: String,
        new: String,
    },

    /// Neither the kind nor any of its aliases has a tag
    #[error("Message kind {kind:?} is not registered")]
    Unregistered { kind: MessageKind },

    /// Tag read from the wire has no registered kind
    #[error("Unknown message tag {tag}")]
    UnknownTag { tag: MessageTag },

    /// A nested message decoded to the wrong kind
    #[error("Expected {expected:?} message, found {found:?}")]
    UnexpectedMessage {
        expected: MessageKind,
        found: MessageKind,
    },

    /// Two enabled options share an id
    #[error("Duplicate enabled option id {id} added to request {sync_key}")]
    DuplicateOption { id: i32, sync_key: i32 },

    /// No unique option could be selected
    #[error("Cannot select an answer for id {id}: {enabled} options enabled")]
    NoSelectableOption { id: i32, enabled: usize },

    /// Option index outside the option list
    #[error("Option index {index} out of range for {len} options")]
    OptionIndexOutOfRange { index: usize, len: usize },

    /// Nested messages deeper than the reader follows
    #[error("Messages nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    /// Encoded frame does not fit its 32-bit length prefix
    #[error("Frame of {size} bytes exceeds the 32-bit length prefix")]
    FrameTooLarge { size: usize },
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

impl CodecError {
    pub fn truncated(need: usize, remaining: usize, context: &'static str) -> Self {
        Self::Truncated {
            need,
            remaining,
            context,
        }
    }

    pub fn invalid_tag(tag: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidTag {
            tag: tag.into(),
            reason,
        }
    }

    /// Protocol or programming defect; the operation must not continue
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::TagCollision { .. }
                | CodecError::KindCollision { .. }
                | CodecError::Unregistered { .. }
                | CodecError::UnknownTag { .. }
                | CodecError::DuplicateOption { .. }
                | CodecError::NestingTooDeep { .. }
        )
    }

    /// Get error category for logs
    pub fn category(&self) -> &'static str {
        match self {
            CodecError::Truncated { .. } => "truncated",
            CodecError::StringTooLong { .. } | CodecError::ListTooLong { .. } => "length",
            CodecError::InvalidTag { .. } => "invalid_tag",
            CodecError::TagCollision { .. } | CodecError::KindCollision { .. } => "registry",
            CodecError::Unregistered { .. } => "unregistered",
            CodecError::UnknownTag { .. } => "unknown_tag",
            CodecError::UnexpectedMessage { .. } => "unexpected_message",
            CodecError::DuplicateOption { .. } => "duplicate_option",
            CodecError::NoSelectableOption { .. } | CodecError::OptionIndexOutOfRange { .. } => {
                "selection"
            }
            CodecError::NestingTooDeep { .. } => "nesting",
            CodecError::FrameTooLarge { .. } => "frame_size",
        }
    }

    /// Pass a fatal error to the fatal hook, returning it for propagation
    pub(crate) fn raise(self) -> Self {
        if self.is_fatal() {
            locking::diag::fatal(&self.to_string());
        }
        self
    }
}
