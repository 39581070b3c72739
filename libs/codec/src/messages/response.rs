use std::fmt;

use super::{MessageKind, SyncRequest, WireMessage};
use crate::error::Result;
use crate::wire::{WireReader, WireWriter};

/// Minimal reply to a [`SyncRequest`], correlated by `sync_key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub sync_key: i32,
    pub answer_id: i32,
    pub answer_text: String,
}

impl Response {
    pub fn new(sync_key: i32, answer_id: i32, answer_text: impl Into<String>) -> Self {
        Self {
            sync_key,
            answer_id,
            answer_text: answer_text.into(),
        }
    }

    /// Reply carrying `request`'s current answer (id -1 and empty text if unanswered)
    pub fn answering(request: &SyncRequest) -> Self {
        Self {
            sync_key: request.sync_key(),
            answer_id: request.answer_id(),
            answer_text: request.answer_text().unwrap_or_default().to_string(),
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self {
            sync_key: -1,
            answer_id: -1,
            answer_text: String::new(),
        }
    }
}

impl WireMessage for Response {
    const KIND: MessageKind = MessageKind::Response;

    fn encode(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_i32(self.sync_key);
        w.put_i32(self.answer_id);
        w.put_str(&self.answer_text)
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let sync_key = r.get_i32()?;
        let answer_id = r.get_i32()?;
        let answer_text = r.get_str()?;
        Ok(Self {
            sync_key,
            answer_id,
            answer_text,
        })
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Response: SynchKey={}, answerID={}, answerStr={}",
            self.sync_key, self.answer_id, self.answer_text
        )
    }
}
