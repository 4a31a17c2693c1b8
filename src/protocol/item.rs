//! SECS-II data items.
//!
//! Covers the item formats a simulated device needs to exchange
//! meaningful payloads: lists, ASCII, binary, booleans and the signed and
//! unsigned integer families.
//!
//! # Wire Format
//!
//! ```text
//! ┌──────────────┬─────────────────┬──────────────┐
//! │ format byte  │ length (1-3 B)  │ data         │
//! │ code<<2 | n  │ big-endian      │              │
//! └──────────────┴─────────────────┴──────────────┘
//! ```
//!
//! For lists the length is the element count; for every other format it is
//! the byte count of the data.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest length expressible with three length bytes.
pub const MAX_ITEM_LEN: usize = 0x00FF_FFFF;

/// Nesting limit applied while decoding untrusted bytes.
const MAX_DEPTH: usize = 64;

// ============================================================================
// ItemFormat
// ============================================================================

/// Format code of a SECS-II item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ItemFormat {
    /// `L` - list of items.
    List = 0o00,
    /// `B` - binary bytes.
    Binary = 0o10,
    /// `BOOLEAN`.
    Boolean = 0o11,
    /// `A` - ASCII text.
    Ascii = 0o20,
    /// `I8`.
    I8 = 0o30,
    /// `I1`.
    I1 = 0o31,
    /// `I2`.
    I2 = 0o32,
    /// `I4`.
    I4 = 0o34,
    /// `U8`.
    U8 = 0o50,
    /// `U1`.
    U1 = 0o51,
    /// `U2`.
    U2 = 0o52,
    /// `U4`.
    U4 = 0o54,
}

impl ItemFormat {
    /// Looks up a format by its 6-bit wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0o00 => Self::List,
            0o10 => Self::Binary,
            0o11 => Self::Boolean,
            0o20 => Self::Ascii,
            0o30 => Self::I8,
            0o31 => Self::I1,
            0o32 => Self::I2,
            0o34 => Self::I4,
            0o50 => Self::U8,
            0o51 => Self::U1,
            0o52 => Self::U2,
            0o54 => Self::U4,
            _ => return None,
        })
    }

    /// Looks up a format by its SML keyword (case-insensitive).
    #[must_use]
    pub fn from_sml_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "L" => Self::List,
            "B" => Self::Binary,
            "BOOLEAN" => Self::Boolean,
            "A" => Self::Ascii,
            "I1" => Self::I1,
            "I2" => Self::I2,
            "I4" => Self::I4,
            "I8" => Self::I8,
            "U1" => Self::U1,
            "U2" => Self::U2,
            "U4" => Self::U4,
            "U8" => Self::U8,
            _ => return None,
        })
    }

    /// Returns the SML keyword for this format.
    #[must_use]
    pub const fn sml_name(self) -> &'static str {
        match self {
            Self::List => "L",
            Self::Binary => "B",
            Self::Boolean => "BOOLEAN",
            Self::Ascii => "A",
            Self::I1 => "I1",
            Self::I2 => "I2",
            Self::I4 => "I4",
            Self::I8 => "I8",
            Self::U1 => "U1",
            Self::U2 => "U2",
            Self::U4 => "U4",
            Self::U8 => "U8",
        }
    }

    /// Size in bytes of one element; lists count items instead.
    #[must_use]
    pub const fn element_size(self) -> usize {
        match self {
            Self::List | Self::Binary | Self::Boolean | Self::Ascii | Self::I1 | Self::U1 => 1,
            Self::I2 | Self::U2 => 2,
            Self::I4 | Self::U4 => 4,
            Self::I8 | Self::U8 => 8,
        }
    }
}

// ============================================================================
// Item
// ============================================================================

/// A SECS-II data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// `L` - nested items.
    List(Vec<Item>),
    /// `A` - ASCII text.
    Ascii(String),
    /// `B` - raw bytes.
    Binary(Vec<u8>),
    /// `BOOLEAN` values.
    Boolean(Vec<bool>),
    /// `U1` values.
    U1(Vec<u8>),
    /// `U2` values.
    U2(Vec<u16>),
    /// `U4` values.
    U4(Vec<u32>),
    /// `U8` values.
    U8(Vec<u64>),
    /// `I1` values.
    I1(Vec<i8>),
    /// `I2` values.
    I2(Vec<i16>),
    /// `I4` values.
    I4(Vec<i32>),
    /// `I8` values.
    I8(Vec<i64>),
}

// ============================================================================
// Item - Constructors & Accessors
// ============================================================================

impl Item {
    /// Creates a list item.
    #[inline]
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Item>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Creates an ASCII item.
    #[inline]
    #[must_use]
    pub fn ascii(text: impl Into<String>) -> Self {
        Self::Ascii(text.into())
    }

    /// Returns the format of this item.
    #[must_use]
    pub const fn format(&self) -> ItemFormat {
        match self {
            Self::List(_) => ItemFormat::List,
            Self::Ascii(_) => ItemFormat::Ascii,
            Self::Binary(_) => ItemFormat::Binary,
            Self::Boolean(_) => ItemFormat::Boolean,
            Self::U1(_) => ItemFormat::U1,
            Self::U2(_) => ItemFormat::U2,
            Self::U4(_) => ItemFormat::U4,
            Self::U8(_) => ItemFormat::U8,
            Self::I1(_) => ItemFormat::I1,
            Self::I2(_) => ItemFormat::I2,
            Self::I4(_) => ItemFormat::I4,
            Self::I8(_) => ItemFormat::I8,
        }
    }

    /// Number of elements (items for lists, bytes for ASCII).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::List(v) => v.len(),
            Self::Ascii(s) => s.len(),
            Self::Binary(v) | Self::U1(v) => v.len(),
            Self::Boolean(v) => v.len(),
            Self::U2(v) => v.len(),
            Self::U4(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I1(v) => v.len(),
            Self::I2(v) => v.len(),
            Self::I4(v) => v.len(),
            Self::I8(v) => v.len(),
        }
    }

    /// Returns `true` if the item holds no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the text of an ASCII item.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the children of a list item.
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Item]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

// ============================================================================
// Item - Encoding
// ============================================================================

impl Item {
    /// Appends the wire encoding of this item to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if any length exceeds
    /// [`MAX_ITEM_LEN`].
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let length = self.len() * self.format().element_size();
        if length > MAX_ITEM_LEN {
            return Err(Error::malformed(format!(
                "{} item length {length} exceeds {MAX_ITEM_LEN}",
                self.format().sml_name()
            )));
        }

        let length_bytes = match length {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            _ => 3,
        };

        dst.reserve(1 + length_bytes + length);
        dst.put_u8(((self.format() as u8) << 2) | length_bytes as u8);
        dst.put_uint(length as u64, length_bytes);

        match self {
            Self::List(items) => {
                for item in items {
                    item.encode(dst)?;
                }
            }
            Self::Ascii(text) => dst.put_slice(text.as_bytes()),
            Self::Binary(v) | Self::U1(v) => dst.put_slice(v),
            Self::Boolean(v) => v.iter().for_each(|b| dst.put_u8(u8::from(*b))),
            Self::U2(v) => v.iter().for_each(|n| dst.put_u16(*n)),
            Self::U4(v) => v.iter().for_each(|n| dst.put_u32(*n)),
            Self::U8(v) => v.iter().for_each(|n| dst.put_u64(*n)),
            Self::I1(v) => v.iter().for_each(|n| dst.put_i8(*n)),
            Self::I2(v) => v.iter().for_each(|n| dst.put_i16(*n)),
            Self::I4(v) => v.iter().for_each(|n| dst.put_i32(*n)),
            Self::I8(v) => v.iter().for_each(|n| dst.put_i64(*n)),
        }

        Ok(())
    }

    /// Returns the wire encoding of this item.
    ///
    /// # Errors
    ///
    /// See [`Item::encode`].
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

// ============================================================================
// Item - Decoding
// ============================================================================

/// Reads `count` numbers with the given getter into a `Vec`.
macro_rules! read_values {
    ($src:expr, $count:expr, $get:ident) => {{
        let mut values = Vec::with_capacity($count);
        for _ in 0..$count {
            values.push($src.$get());
        }
        values
    }};
}

impl Item {
    /// Decodes one item from the front of `src`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on truncated data, unknown format codes
    /// or lengths that are not a multiple of the element size.
    pub fn decode(src: &mut Bytes) -> Result<Self> {
        Self::decode_nested(src, 0)
    }

    fn decode_nested(src: &mut Bytes, depth: usize) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(Error::protocol("item nesting too deep"));
        }
        if src.is_empty() {
            return Err(Error::protocol("missing item format byte"));
        }

        let format_byte = src.get_u8();
        let length_bytes = usize::from(format_byte & 0b11);
        let format = ItemFormat::from_code(format_byte >> 2).ok_or_else(|| {
            Error::protocol(format!("unknown item format code 0o{:o}", format_byte >> 2))
        })?;

        if length_bytes == 0 {
            return Err(Error::protocol("item declares zero length bytes"));
        }
        if src.remaining() < length_bytes {
            return Err(Error::protocol("truncated item length"));
        }
        let length = src.get_uint(length_bytes) as usize;

        if format == ItemFormat::List {
            let mut items = Vec::with_capacity(length.min(src.remaining()));
            for _ in 0..length {
                items.push(Self::decode_nested(src, depth + 1)?);
            }
            return Ok(Self::List(items));
        }

        if src.remaining() < length {
            return Err(Error::protocol(format!(
                "truncated {} item: need {length} bytes, have {}",
                format.sml_name(),
                src.remaining()
            )));
        }

        let size = format.element_size();
        if length % size != 0 {
            return Err(Error::protocol(format!(
                "{} item length {length} is not a multiple of {size}",
                format.sml_name()
            )));
        }

        let mut data = src.split_to(length);
        let count = length / size;

        Ok(match format {
            ItemFormat::List => unreachable!("lists are decoded above"),
            ItemFormat::Ascii => Self::Ascii(String::from_utf8_lossy(&data).into_owned()),
            ItemFormat::Binary => Self::Binary(data.to_vec()),
            ItemFormat::Boolean => Self::Boolean(data.iter().map(|b| *b != 0).collect()),
            ItemFormat::U1 => Self::U1(data.to_vec()),
            ItemFormat::U2 => Self::U2(read_values!(data, count, get_u16)),
            ItemFormat::U4 => Self::U4(read_values!(data, count, get_u32)),
            ItemFormat::U8 => Self::U8(read_values!(data, count, get_u64)),
            ItemFormat::I1 => Self::I1(read_values!(data, count, get_i8)),
            ItemFormat::I2 => Self::I2(read_values!(data, count, get_i16)),
            ItemFormat::I4 => Self::I4(read_values!(data, count, get_i32)),
            ItemFormat::I8 => Self::I8(read_values!(data, count, get_i64)),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
