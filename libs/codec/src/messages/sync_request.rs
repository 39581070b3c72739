//! # SyncRequest - a question with selectable options
//!
//! ## Purpose
//!
//! A request travels to the peer carrying a prompt and an ordered list of
//! [`RequestOption`]s; the peer answers by selecting one option (or typing a
//! free-text answer) and sends it back as a [`super::Response`] or as the same
//! request with its answer set. The `sync_key` correlates the two.
//!
//! ## Option Rules
//!
//! - Two *enabled* options never share an id. Separators (id -1) and disabled
//!   duplicates are allowed; a repeated cancel option is ignored.
//! - `set_answer_by_id` falls back to the only enabled option when the id does
//!   not match an enabled one.
//! - A request whose only enabled option is cancel is not itself cancelable.
//!
//! ## Wire Format
//!
//! ```text
//! sync_key:i32 message:string options:list<[tag][RequestOption]>
//! default_id:i32 has_answer:bool [tag][RequestOption]?
//! ```
//!
//! Key bindings and the results queue are local and never transmitted.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

use super::{Message, MessageKind, RequestOption, WireMessage};
use crate::error::{CodecError, Result};
use crate::results::{ResultsQueue, SyncKeyAllocator};
use crate::wire::{WireReader, WireWriter};

/// A key on the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Escape,
}

/// A key press with its modifier state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: Key,
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

impl KeyPress {
    pub fn char(c: char) -> Self {
        Self {
            key: Key::Char(c),
            shift: false,
            ctrl: false,
            alt: false,
        }
    }

    pub fn escape() -> Self {
        Self {
            key: Key::Escape,
            shift: false,
            ctrl: false,
            alt: false,
        }
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }
}

/// Character shortcuts per modifier, mapping to option ids
#[derive(Debug, Clone, Default)]
struct KeyBindings {
    plain: HashMap<char, i32>,
    alt: HashMap<char, i32>,
    ctrl: HashMap<char, i32>,
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

impl KeyBindings {
    /// Bind the first still-unbound character of `allowed` to `id`.
    ///
    /// `allowed` is a run of characters, each optionally preceded by `<alt>` or
    /// `<ctrl>`. A modifier stays in effect for the rest of the string.
    fn bind(&mut self, allowed: &str, id: i32) -> bool {
        let mut rest = allowed;
        let (mut alt, mut ctrl) = (false, false);
        while !rest.is_empty() {
            if let Some(tail) = strip_prefix_ignore_case(rest, "<alt>") {
                rest = tail;
                alt = true;
            }
            if let Some(tail) = strip_prefix_ignore_case(rest, "<ctrl>") {
                rest = tail;
                ctrl = true;
            }
            let mut chars = rest.chars();
            let Some(key) = chars.next() else {
                break;
            };
            rest = chars.as_str();

            let map = if ctrl {
                &mut self.ctrl
            } else if alt {
                &mut self.alt
            } else {
                &mut self.plain
            };
            if let Entry::Vacant(slot) = map.entry(key) {
                slot.insert(id);
                return true;
            }
        }
        false
    }

    fn lookup(&self, c: char, press: &KeyPress) -> Option<i32> {
        let c = if press.shift {
            c.to_uppercase().next().unwrap_or(c)
        } else {
            c
        };
        if press.ctrl {
            self.ctrl.get(&c).copied()
        } else if press.alt {
            self.alt.get(&c).copied()
        } else {
            self.plain.get(&c).copied()
        }
    }

    fn label(&self, id: i32) -> Option<String> {
        let find = |map: &HashMap<char, i32>| {
            map.iter()
                .find(|(_, bound)| **bound == id)
                .map(|(c, _)| *c)
        };
        if let Some(c) = find(&self.plain) {
            return Some(c.to_string());
        }
        if let Some(c) = find(&self.alt) {
            return Some(format!("<alt>-{}", c));
        }
        find(&self.ctrl).map(|c| format!("<ctrl>-{}", c))
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    sync_key: i32,
    message: String,
    options: Vec<RequestOption>,
    default_id: i32,
    answer: Option<RequestOption>,
    results_queue: Option<ResultsQueue>,
    backup_selected: bool,
    keys: KeyBindings,
}

impl SyncRequest {
    /// New unanswered request keyed from the process-wide allocator
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_key(SyncKeyAllocator::global().next(), message)
    }

    pub fn with_key(sync_key: i32, message: impl Into<String>) -> Self {
        Self {
            sync_key,
            message: message.into(),
            options: Vec::new(),
            default_id: -1,
            answer: None,
            results_queue: None,
            backup_selected: false,
            keys: KeyBindings::default(),
        }
    }

    pub fn sync_key(&self) -> i32 {
        self.sync_key
    }

    pub fn set_sync_key(&mut self, sync_key: i32) {
        self.sync_key = sync_key;
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    // ---- options ---------------------------------------------------------

    /// Append an option. A second enabled option with an id already enabled
    /// here is a fatal error.
    pub fn add_option(&mut self, option: RequestOption) -> Result<()> {
        self.push_option(option).map(|_| ())
    }

    /// Append an option and bind it to the first free key in `allowed`
    /// (for example `"y"`, `"<alt>x"`, `"<ctrl>q"`).
    pub fn add_option_with_keys(&mut self, option: RequestOption, allowed: &str) -> Result<()> {
        let (id, enabled) = (option.id, option.enabled);
        if self.push_option(option)? && enabled && id != RequestOption::CUSTOM_ID {
            self.keys.bind(allowed, id);
        }
        Ok(())
    }

    /// Returns whether the option was appended
    fn push_option(&mut self, option: RequestOption) -> Result<bool> {
        if option.id != RequestOption::SEPARATOR_ID {
            let mut same_id = self.options.iter().filter(|o| o.id == option.id).peekable();
            if same_id.peek().is_some() && option.is_cancel() {
                return Ok(false);
            }
            if option.enabled && same_id.any(|o| o.enabled) {
                return Err(CodecError::DuplicateOption {
                    id: option.id,
                    sync_key: self.sync_key,
                }
                .raise());
            }
        }
        self.options.push(option);
        Ok(true)
    }

    pub fn add_separator(&mut self) {
        self.options.push(RequestOption::separator());
    }

    pub fn options(&self) -> &[RequestOption] {
        &self.options
    }

    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    pub fn option_by_id(&self, id: i32) -> Option<&RequestOption> {
        self.options.iter().find(|o| o.id == id)
    }

    pub fn enabled_count(&self, include_cancel: bool) -> usize {
        self.options
            .iter()
            .filter(|o| o.enabled && (include_cancel || !o.is_cancel()))
            .count()
    }

    /// Name of the only enabled non-cancel option, if exactly one exists
    pub fn single_enabled_action(&self) -> Option<&str> {
        let mut enabled = self.options.iter().filter(|o| o.enabled && !o.is_cancel());
        match (enabled.next(), enabled.next()) {
            (Some(only), None) => Some(&only.name),
            _ => None,
        }
    }

    pub fn set_default_option(&mut self, id: i32) {
        self.default_id = id;
    }

    pub fn default_id(&self) -> i32 {
        self.default_id
    }

    pub fn default_index(&self) -> Option<usize> {
        self.options.iter().position(|o| o.id == self.default_id)
    }

    // ---- answer ----------------------------------------------------------

    pub fn answer(&self) -> Option<&RequestOption> {
        self.answer.as_ref()
    }

    pub fn answer_text(&self) -> Option<&str> {
        self.answer.as_ref().map(|a| a.name.as_str())
    }

    /// Id of the answer, -1 when unanswered
    pub fn answer_id(&self) -> i32 {
        self.answer.as_ref().map_or(-1, |a| a.id)
    }

    pub fn answer_index(&self) -> Option<usize> {
        let id = self.answer.as_ref()?.id;
        self.options.iter().position(|o| o.id == id)
    }

    pub fn is_answered(&self) -> bool {
        self.answer.is_some()
    }

    pub fn is_cancel(&self) -> bool {
        self.answer.as_ref().is_some_and(RequestOption::is_cancel)
    }

    /// False only when exactly one option (cancel included) is enabled
    pub fn is_cancelable(&self) -> bool {
        self.enabled_count(true) != 1
    }

    pub fn set_answer_by_index(&mut self, index: usize) -> Result<()> {
        let option = self
            .options
            .get(index)
            .cloned()
            .ok_or(CodecError::OptionIndexOutOfRange {
                index,
                len: self.options.len(),
            })?;
        self.answer = Some(option);
        Ok(())
    }

    /// Free-text answer outside the option list
    pub fn set_custom_answer(&mut self, text: impl Into<String>) {
        self.answer = Some(RequestOption::new(text, RequestOption::CUSTOM_ID, true));
    }

    /// Select the enabled option with `id`, or the only enabled option if
    /// there is exactly one.
    pub fn set_answer_by_id(&mut self, id: i32) -> Result<()> {
        if let Some(option) = self.options.iter().find(|o| o.id == id && o.enabled) {
            self.answer = Some(option.clone());
            return Ok(());
        }
        let mut enabled = self.options.iter().filter(|o| o.enabled);
        match (enabled.next(), enabled.next()) {
            (Some(only), None) => {
                self.answer = Some(only.clone());
                Ok(())
            }
            _ => Err(CodecError::NoSelectableOption {
                id,
                enabled: self.enabled_count(true),
            }),
        }
    }

    /// Reapply another request's answer to this one
    pub fn copy_answer_from(&mut self, source: &SyncRequest) -> Result<()> {
        self.set_answer_by_id(source.answer_id())
    }

    /// Auto-select when the choice is forced.
    ///
    /// Exactly one candidate enabled: select it. None enabled: add a
    /// "no action" option and select that. More than one: fail.
    pub fn select_single_enabled_entry(&mut self, ignore_cancel: bool) -> Result<()> {
        let mut candidates = self
            .options
            .iter()
            .filter(|o| o.enabled && !(ignore_cancel && o.is_cancel()));
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => {
                self.answer = Some(only.clone());
                Ok(())
            }
            (None, _) => {
                let no_action = RequestOption::new("no action", RequestOption::NO_ACTION_ID, true);
                self.add_option(no_action.clone())?;
                self.answer = Some(no_action);
                Ok(())
            }
            _ => Err(CodecError::NoSelectableOption {
                id: RequestOption::NO_ACTION_ID,
                enabled: self.enabled_count(!ignore_cancel),
            }),
        }
    }

    /// Copy the answer carried by a correlated reply into this request.
    ///
    /// A `Response` always answers; an echoed request copies whatever answer
    /// it carries, which may be none.
    pub fn apply_reply(&mut self, reply: &Message) -> Result<()> {
        match reply {
            Message::Response(response) => {
                self.answer = Some(RequestOption::new(
                    response.answer_text.clone(),
                    response.answer_id,
                    true,
                ));
            }
            Message::SyncRequest(request) => {
                self.answer = request.answer.clone();
            }
            other => {
                return Err(CodecError::UnexpectedMessage {
                    expected: MessageKind::Response,
                    found: other.kind(),
                })
            }
        }
        Ok(())
    }

    pub fn backup_selected(&self) -> bool {
        self.backup_selected
    }

    /// Selecting the backup entry clears any answer
    pub fn set_backup_selected(&mut self, selected: bool) {
        self.backup_selected = selected;
        if selected {
            self.answer = None;
        }
    }

    /// Same prompt and options, whatever either answer is
    pub fn is_same_question(&self, other: &SyncRequest) -> bool {
        self.message == other.message && self.options == other.options
    }

    // ---- results queue ---------------------------------------------------

    pub fn results_queue(&self) -> Option<&ResultsQueue> {
        self.results_queue.as_ref()
    }

    pub fn set_results_queue(&mut self, queue: Option<ResultsQueue>) {
        self.results_queue = queue;
    }

    // ---- keystrokes ------------------------------------------------------

    pub fn option_id_for_keystroke(&self, press: KeyPress) -> Option<i32> {
        match press.key {
            Key::Escape => self
                .options
                .iter()
                .any(RequestOption::is_cancel)
                .then_some(RequestOption::CANCEL_ID),
            Key::Char(c) => self.keys.lookup(c, &press),
        }
    }

    /// Answer from a key press; false if the key is unbound or selects nothing
    pub fn key_pressed(&mut self, press: KeyPress) -> bool {
        match self.option_id_for_keystroke(press) {
            Some(id) => self.set_answer_by_id(id).is_ok(),
            None => false,
        }
    }

    /// Shortcut shown next to an option: `"Esc"`, `"a"`, `"<alt>-a"`, `"<ctrl>-a"` or `""`
    pub fn keystroke_label(&self, index: usize) -> String {
        let Some(option) = self.options.get(index) else {
            return String::new();
        };
        if option.is_cancel() {
            return "Esc".to_string();
        }
        self.keys.label(option.id).unwrap_or_default()
    }
}

/// Wire fields only: key bindings, queue and backup flag are local state
impl PartialEq for SyncRequest {
    fn eq(&self, other: &Self) -> bool {
        self.sync_key == other.sync_key
            && self.message == other.message
            && self.options == other.options
            && self.default_id == other.default_id
            && self.answer == other.answer
    }
}

impl WireMessage for SyncRequest {
    const KIND: MessageKind = MessageKind::SyncRequest;

    fn encode(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_i32(self.sync_key);
        w.put_str(&self.message)?;
        w.put_list(&self.options)?;
        w.put_i32(self.default_id);
        w.put_bool(self.answer.is_some());
        if let Some(answer) = &self.answer {
            w.put_tagged(answer)?;
        }
        Ok(())
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let sync_key = r.get_i32()?;
        let mut request = SyncRequest::with_key(sync_key, r.get_str()?);
        for item in r.get_list::<Message>()? {
            match item {
                Message::RequestOption(option) => request.options.push(option),
                other => warn!(
                    sync_key,
                    kind = other.kind().name(),
                    "Dropping non-option entry from request option list"
                ),
            }
        }
        request.default_id = r.get_i32()?;
        if r.get_bool()? {
            request.answer = Some(r.get_tagged::<RequestOption>()?);
        }
        Ok(request)
    }
}

impl fmt::Display for SyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncRequest: SyncKey: {}, Message: {}", self.sync_key, self.message)?;
        for option in &self.options {
            write!(f, "\n   {}", option)?;
        }
        match &self.answer {
            Some(answer) => write!(f, "\nAnswer: {}", answer)?,
            None => f.write_str("\nAnswer: -1")?,
        }
        write!(f, "\nDefault: {}", self.default_id)?;
        match &self.results_queue {
            Some(queue) => write!(f, "\nresultsQueue={}", queue.id()),
            None => f.write_str("\nresultsQueue=null"),
        }
    }
}
