//! # Wire Primitives - big-endian values, Latin-1 strings, counted lists
//!
//! ## Purpose
//!
//! [`WireWriter`] and [`WireReader`] implement the fixed set of value shapes the
//! protocol supports. Everything is big-endian at natural width:
//!
//! ```text
//! i8/i16/i32/i64   1/2/4/8 bytes, two's complement
//! f32/f64          IEEE 754, 4/8 bytes
//! bool             1 byte, non-zero is true
//! string           len:i16 bytes[len]   (ISO-8859-1; len <= 0 reads as "")
//! list<T>          count:i16 element[count]
//! message          tag:[u8; 6] body
//! ```
//!
//! Both sides carry a [`TypeRegistry`] so nested messages can be tagged on the
//! way out and constructed from their tag on the way in.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{CodecError, Result};
use crate::messages::{Message, WireMessage};
use crate::registry::TypeRegistry;
use crate::tag::{MessageTag, TAG_LEN};

/// Replacement for characters outside ISO-8859-1
const UNMAPPABLE: u8 = b'?';

/// Deepest chain of nested messages a reader will follow
pub const MAX_NESTING_DEPTH: usize = 32;

/// A value with a fixed wire shape, usable as a list element
pub trait WireValue: Sized {
    fn write_to(&self, w: &mut WireWriter<'_>) -> Result<()>;
    fn read_from(r: &mut WireReader<'_>) -> Result<Self>;
}

/// Serializer into an owned buffer
pub struct WireWriter<'a> {
    buf: BytesMut,
    registry: &'a TypeRegistry,
}

impl<'a> WireWriter<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self::with_capacity(registry, 64)
    }

    pub fn with_capacity(registry: &'a TypeRegistry, capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            registry,
        }
    }

    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn put_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn put_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Length-prefixed ISO-8859-1 string; unmappable characters become `?`
    pub fn put_str(&mut self, value: &str) -> Result<()> {
        let encoded: Vec<u8> = value
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(UNMAPPABLE))
            .collect();
        let len = i16::try_from(encoded.len())
            .map_err(|_| CodecError::StringTooLong { len: encoded.len() })?;
        self.buf.put_i16(len);
        self.buf.put_slice(&encoded);
        Ok(())
    }

    pub fn put_list<T: WireValue>(&mut self, items: &[T]) -> Result<()> {
        let count =
            i16::try_from(items.len()).map_err(|_| CodecError::ListTooLong { len: items.len() })?;
        self.buf.put_i16(count);
        for item in items {
            item.write_to(self)?;
        }
        Ok(())
    }

    pub fn put_tag(&mut self, tag: MessageTag) {
        self.buf.put_slice(tag.as_bytes());
    }

    /// `[tag][body]` for any message, tagged by its runtime kind
    pub fn put_message(&mut self, message: &Message) -> Result<()> {
        let tag = self.registry.tag_of(message)?;
        self.put_tag(tag);
        message.encode_body(self)
    }

    /// `[tag][body]` for a concrete message type
    pub fn put_tagged<M: WireMessage>(&mut self, message: &M) -> Result<()> {
        let tag = self.registry.tag_of_kind(M::KIND)?;
        self.put_tag(tag);
        message.encode(self)
    }
}

/// Deserializer over a borrowed byte slice
pub struct WireReader<'a> {
    buf: &'a [u8],
    registry: &'a TypeRegistry,
    depth: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], registry: &'a TypeRegistry) -> Self {
        Self {
            buf,
            registry,
            depth: 0,
        }
    }

    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, need: usize, context: &'static str) -> Result<()> {
        if self.buf.remaining() < need {
            return Err(CodecError::truncated(need, self.buf.remaining(), context));
        }
        Ok(())
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        self.ensure(1, "i8")?;
        Ok(self.buf.get_i8())
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        self.ensure(2, "i16")?;
        Ok(self.buf.get_i16())
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.ensure(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        self.ensure(8, "i64")?;
        Ok(self.buf.get_i64())
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        self.ensure(4, "f32")?;
        Ok(self.buf.get_f32())
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        self.ensure(8, "f64")?;
        Ok(self.buf.get_f64())
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        self.ensure(1, "bool")?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn get_str(&mut self) -> Result<String> {
        let len = self.get_i16()?;
        // Zero and negative lengths both decode as the empty string
        if len <= 0 {
            return Ok(String::new());
        }
        let len = len as usize;
        self.ensure(len, "string body")?;
        let text = self.buf[..len].iter().map(|&b| char::from(b)).collect();
        self.buf.advance(len);
        Ok(text)
    }

    pub fn get_list<T: WireValue>(&mut self) -> Result<Vec<T>> {
        let count = self.get_i16()?.max(0) as usize;
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(T::read_from(self)?);
        }
        Ok(items)
    }

    pub fn get_tag(&mut self) -> Result<MessageTag> {
        self.ensure(TAG_LEN, "message tag")?;
        let mut bytes = [0u8; TAG_LEN];
        self.buf.copy_to_slice(&mut bytes);
        Ok(MessageTag::new(bytes))
    }

    /// `[tag][body]`, constructing whichever kind the tag names
    pub fn get_message(&mut self) -> Result<Message> {
        let tag = self.get_tag()?;
        let registry = self.registry;
        self.nested(|r| registry.decode(tag, r))
    }

    /// `[tag][body]` that must decode to `M`
    pub fn get_tagged<M: WireMessage>(&mut self) -> Result<M> {
        let tag = self.get_tag()?;
        let kind = self.registry.kind_of(tag)?;
        if kind != M::KIND {
            return Err(CodecError::UnexpectedMessage {
                expected: M::KIND,
                found: kind,
            });
        }
        self.nested(M::decode)
    }

    /// Run `f` one message level deeper, refusing chains past [`MAX_NESTING_DEPTH`]
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CodecError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
            }
            .raise());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

macro_rules! primitive_wire_value {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl WireValue for $ty {
                fn write_to(&self, w: &mut WireWriter<'_>) -> Result<()> {
                    w.$put(*self);
                    Ok(())
                }

                fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
                    r.$get()
                }
            }
        )*
    };
}

primitive_wire_value! {
    i8 => put_i8, get_i8;
    i16 => put_i16, get_i16;
    i32 => put_i32, get_i32;
    i64 => put_i64, get_i64;
    f32 => put_f32, get_f32;
    f64 => put_f64, get_f64;
    bool => put_bool, get_bool;
}

impl WireValue for String {
    fn write_to(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_str(self)
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        r.get_str()
    }
}

impl WireValue for Message {
    fn write_to(&self, w: &mut WireWriter<'_>) -> Result<()> {
        w.put_message(self)
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self> {
        r.get_message()
    }
}
