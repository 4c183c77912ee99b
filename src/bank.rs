//! Self-describing event container made of named, typed banks.
//!
//! The layout is the MIDAS 32-bit bank format, little-endian, so events can be
//! consumed by existing analysers without conversion.
//!
//! # Memory Layout
//! ```text
//! [event header: 8 bytes] [bank] [bank] ...
//!
//! Event header:
//!   data_size: u32   (bytes of all banks that follow)
//!   flags:     u32   (BANK_FORMAT_VERSION | BANK_FORMAT_32BIT = 0x11)
//!
//! Bank:
//!   name:      [u8; 4]
//!   type_id:   u32   (MIDAS TID_*)
//!   data_size: u32   (payload bytes, without padding)
//!   payload, zero-padded to a multiple of 8 bytes
//! ```
//!
//! [`EventBuilder`] writes events into a [`BytesMut`]; [`EventReader`]
//! validates and walks a finished buffer.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Bank format version flag.
pub const BANK_FORMAT_VERSION: u32 = 0x0000_0001;

/// Flag marking 32-bit bank headers.
pub const BANK_FORMAT_32BIT: u32 = 0x0000_0010;

/// Flags written by [`EventBuilder`].
pub const EVENT_FLAGS: u32 = BANK_FORMAT_VERSION | BANK_FORMAT_32BIT;

/// Size of the event header.
pub const EVENT_HEADER_SIZE: usize = 8;

/// Size of a 32-bit bank header.
pub const BANK_HEADER_SIZE: usize = 12;

/// Bank payloads are padded to this boundary.
pub const BANK_ALIGNMENT: usize = 8;

/// Round `size` up to the bank alignment.
#[inline]
pub const fn align8(size: usize) -> usize {
    (size + BANK_ALIGNMENT - 1) & !(BANK_ALIGNMENT - 1)
}

/// Bytes taken by a bank with `payload` bytes of data, header included.
#[inline]
pub const fn bank_footprint(payload: usize) -> usize {
    BANK_HEADER_SIZE + align8(payload)
}

/// Errors raised while decoding an event buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    /// The buffer ends before a header or payload does.
    #[error("Truncated event: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to continue
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// The event header does not describe 32-bit banks.
    #[error("Unsupported bank flags 0x{0:08X}")]
    UnsupportedFlags(u32),

    /// A bank carries a type id outside the known set.
    #[error("Bank {name} has unknown type id {type_id}")]
    UnknownType {
        /// Bank name
        name: BankName,
        /// Raw type id
        type_id: u32,
    },

    /// A bank payload is not a whole number of items.
    #[error("Bank {name} payload of {size} bytes is not a multiple of {item_size}")]
    PartialItem {
        /// Bank name
        name: BankName,
        /// Payload size
        size: usize,
        /// Item size of the bank type
        item_size: usize,
    },

    /// A required bank is absent.
    #[error("Bank {0} not found")]
    Missing(BankName),

    /// A bank payload has an unexpected size for its decoder.
    #[error("Bank {name} has {actual} bytes, expected {expected}")]
    UnexpectedSize {
        /// Bank name
        name: BankName,
        /// Size the decoder requires
        expected: usize,
        /// Size found
        actual: usize,
    },
}

// =============================================================================
// TypeId / BankName
// =============================================================================

/// Item type of a bank payload (MIDAS `TID_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TypeId {
    /// Unsigned byte
    Byte = 1,
    /// Signed byte
    SByte = 2,
    /// 8-bit character
    Char = 3,
    /// Unsigned 16-bit word
    Word = 4,
    /// Signed 16-bit
    Short = 5,
    /// Unsigned 32-bit
    DWord = 6,
    /// Signed 32-bit
    Int = 7,
    /// 32-bit boolean
    Bool = 8,
    /// 32-bit float
    Float = 9,
    /// 64-bit float
    Double = 10,
}

impl TypeId {
    /// Decode a raw type id.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Byte,
            2 => Self::SByte,
            3 => Self::Char,
            4 => Self::Word,
            5 => Self::Short,
            6 => Self::DWord,
            7 => Self::Int,
            8 => Self::Bool,
            9 => Self::Float,
            10 => Self::Double,
            _ => return None,
        })
    }

    /// Size of one item in bytes.
    pub fn item_size(self) -> usize {
        match self {
            Self::Byte | Self::SByte | Self::Char => 1,
            Self::Word | Self::Short => 2,
            Self::DWord | Self::Int | Self::Bool | Self::Float => 4,
            Self::Double => 8,
        }
    }
}

/// Four-character bank name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankName([u8; 4]);

impl BankName {
    /// Name from four ASCII bytes.
    pub const fn new(name: &[u8; 4]) -> Self {
        Self(*name)
    }

    /// Two-character prefix followed by a two-digit index, e.g. `W203`.
    ///
    /// Indices wrap at 100.
    pub const fn indexed(prefix: &[u8; 2], index: usize) -> Self {
        let index = index % 100;
        Self([
            prefix[0],
            prefix[1],
            b'0' + (index / 10) as u8,
            b'0' + (index % 10) as u8,
        ])
    }

    /// Raw name bytes.
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for BankName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for BankName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BankName({self})")
    }
}

// =============================================================================
// EventBuilder / BankWriter
// =============================================================================

/// Writes one event into a byte buffer.
///
/// The event starts at the current end of `buf`; callers producing one event
/// per buffer should clear it first.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use sinus_daq::bank::{BankName, EventBuilder, EventReader, TypeId};
///
/// let mut buf = BytesMut::new();
/// let mut event = EventBuilder::new(&mut buf);
/// let mut bank = event.create_bank(BankName::new(b"DCOF"), TypeId::Word);
/// bank.put_u16_slice(&[1, 2, 3]);
/// bank.close();
/// let size = event.total_size();
///
/// let reader = EventReader::parse(&buf[..size]).unwrap();
/// assert_eq!(reader.banks().len(), 1);
/// ```
pub struct EventBuilder<'a> {
    buf: &'a mut BytesMut,
    start: usize,
}

impl<'a> EventBuilder<'a> {
    /// Start a new event with an empty bank list.
    pub fn new(buf: &'a mut BytesMut) -> Self {
        let start = buf.len();
        buf.put_u32_le(0);
        buf.put_u32_le(EVENT_FLAGS);
        Self { buf, start }
    }

    /// Open a bank; it is closed by [`BankWriter::close`] or when dropped.
    pub fn create_bank(&mut self, name: BankName, type_id: TypeId) -> BankWriter<'_> {
        let header_at = self.buf.len();
        self.buf.put_slice(name.as_bytes());
        self.buf.put_u32_le(type_id as u32);
        self.buf.put_u32_le(0);
        BankWriter {
            buf: &mut *self.buf,
            event_start: self.start,
            header_at,
            closed: false,
        }
    }

    /// Size of the event so far, header included.
    pub fn total_size(&self) -> usize {
        self.buf.len() - self.start
    }
}

/// Appends the payload of one open bank.
pub struct BankWriter<'b> {
    buf: &'b mut BytesMut,
    event_start: usize,
    header_at: usize,
    closed: bool,
}

impl BankWriter<'_> {
    /// Append one 16-bit word.
    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    /// Append one 32-bit word.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    /// Append one 64-bit word.
    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    /// Append a run of 16-bit words.
    pub fn put_u16_slice(&mut self, values: &[u16]) {
        self.buf.reserve(values.len() * 2);
        for &value in values {
            self.buf.put_u16_le(value);
        }
    }

    /// Payload bytes written so far.
    pub fn data_size(&self) -> usize {
        self.buf.len() - self.header_at - BANK_HEADER_SIZE
    }

    /// Close the bank: record its size, pad it and update the event header.
    ///
    /// Returns the payload size in bytes.
    pub fn close(mut self) -> usize {
        self.finish()
    }

    fn finish(&mut self) -> usize {
        let data_size = self.data_size();
        if self.closed {
            return data_size;
        }
        self.closed = true;

        let size_at = self.header_at + 8;
        self.buf[size_at..size_at + 4].copy_from_slice(&(data_size as u32).to_le_bytes());
        self.buf.put_bytes(0, align8(data_size) - data_size);

        let banks_size = self.buf.len() - self.event_start - EVENT_HEADER_SIZE;
        self.buf[self.event_start..self.event_start + 4]
            .copy_from_slice(&(banks_size as u32).to_le_bytes());
        data_size
    }
}

impl Drop for BankWriter<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

// =============================================================================
// EventReader
// =============================================================================

/// One decoded bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bank<'a> {
    /// Bank name
    pub name: BankName,
    /// Item type
    pub type_id: TypeId,
    /// Payload without padding
    pub data: &'a [u8],
}

impl Bank<'_> {
    /// Number of items in the payload.
    pub fn len(&self) -> usize {
        self.data.len() / self.type_id.item_size()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload as little-endian 16-bit words.
    pub fn words(&self) -> Vec<u16> {
        let mut data = self.data;
        let mut out = Vec::with_capacity(data.len() / 2);
        while data.remaining() >= 2 {
            out.push(data.get_u16_le());
        }
        out
    }

    /// Payload as little-endian 32-bit words.
    pub fn dwords(&self) -> Vec<u32> {
        let mut data = self.data;
        let mut out = Vec::with_capacity(data.len() / 4);
        while data.remaining() >= 4 {
            out.push(data.get_u32_le());
        }
        out
    }
}

/// Validated view of an event buffer.
#[derive(Debug, Clone)]
pub struct EventReader<'a> {
    total_size: usize,
    banks: Vec<Bank<'a>>,
}

impl<'a> EventReader<'a> {
    /// Validate `bytes` and index its banks.
    ///
    /// Trailing bytes past the size recorded in the header are ignored.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BankError> {
        let mut cursor = bytes;
        ensure(cursor, EVENT_HEADER_SIZE)?;
        let banks_size = cursor.get_u32_le() as usize;
        let flags = cursor.get_u32_le();
        if flags & BANK_FORMAT_32BIT == 0 {
            return Err(BankError::UnsupportedFlags(flags));
        }

        ensure(cursor, banks_size)?;
        let mut cursor = &cursor[..banks_size];
        let mut banks = Vec::new();

        while cursor.has_remaining() {
            ensure(cursor, BANK_HEADER_SIZE)?;
            let mut raw_name = [0u8; 4];
            cursor.copy_to_slice(&mut raw_name);
            let name = BankName::new(&raw_name);
            let raw_type = cursor.get_u32_le();
            let data_size = cursor.get_u32_le() as usize;

            let type_id = TypeId::from_raw(raw_type).ok_or(BankError::UnknownType {
                name,
                type_id: raw_type,
            })?;
            if data_size % type_id.item_size() != 0 {
                return Err(BankError::PartialItem {
                    name,
                    size: data_size,
                    item_size: type_id.item_size(),
                });
            }

            ensure(cursor, align8(data_size))?;
            let data = &cursor[..data_size];
            cursor.advance(align8(data_size));
            banks.push(Bank {
                name,
                type_id,
                data,
            });
        }

        Ok(Self {
            total_size: EVENT_HEADER_SIZE + banks_size,
            banks,
        })
    }

    /// Banks in buffer order.
    pub fn banks(&self) -> &[Bank<'a>] {
        &self.banks
    }

    /// First bank called `name`.
    pub fn find(&self, name: BankName) -> Option<&Bank<'a>> {
        self.banks.iter().find(|bank| bank.name == name)
    }

    /// First bank called `name`, or [`BankError::Missing`].
    pub fn require(&self, name: BankName) -> Result<&Bank<'a>, BankError> {
        self.find(name).ok_or(BankError::Missing(name))
    }

    /// Event size including the event header.
    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

fn ensure(cursor: &[u8], needed: usize) -> Result<(), BankError> {
    if cursor.remaining() < needed {
        return Err(BankError::Truncated {
            needed,
            available: cursor.remaining(),
        });
    }
    Ok(())
}
