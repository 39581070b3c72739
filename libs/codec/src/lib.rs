//! # Lockstep Codec - Tagged Binary Messages
//!
//! ## Purpose
//!
//! Turns typed messages into bytes and back. Every message on the wire is a
//! six-byte tag followed by a kind-specific body; the [`TypeRegistry`] maps tags
//! to [`MessageKind`]s in both directions and builds length-prefixed frames.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/locking → [codec] → libs/network
//!      ↑            ↓            ↓
//!  Lock orders  Tag registry  Framed TCP
//!  Fatal hook   Wire values   Correlation
//! ```
//!
//! ## What This Crate Contains
//! - [`WireWriter`] / [`WireReader`]: big-endian primitives, Latin-1 strings, counted lists
//! - [`MessageTag`] and [`TypeRegistry`] (bijective, with alias fallback)
//! - The closed set of [`Message`] variants, including [`SyncRequest`] and its
//!   option-selection rules
//! - [`ResultsQueue`] for waiting on several requests at once, and
//!   [`SyncKeyAllocator`]
//! - [`dump::hex_dump`] for trace-level frame dumps
//!
//! ## What This Crate Does NOT Contain
//! - Sockets, receive loops or pending-request tables (belongs in network/)
//! - General-purpose serialization: only the fixed value shapes are supported

pub mod dump;
pub mod error;
pub mod messages;
pub mod registry;
pub mod results;
pub mod tag;
pub mod wire;

pub use error::{CodecError, Result};
pub use messages::{
    ClientId, Key, KeyPress, Message, MessageKind, ObjectChanged, ObjectDelete, ObjectInfo,
    RequestOption, Response, SyncRequest, WireMessage,
};
pub use registry::{TypeRegistry, FRAME_HEADER_LEN, STANDARD_TAGS};
pub use results::{ResultsQueue, SyncKeyAllocator};
pub use tag::{MessageTag, TAG_LEN};
pub use wire::{WireReader, WireValue, WireWriter, MAX_NESTING_DEPTH};
