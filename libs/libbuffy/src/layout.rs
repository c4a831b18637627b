//! # Descriptor Layouts
//!
//! The in-memory byte layout of a channel descriptor is its wire protocol: a
//! debug probe with no symbol information finds the descriptor by its
//! signature word and then reads the fields at fixed offsets. Every layout
//! change gets a new signature so that a probe built for one revision
//! rejects the other instead of misreading it. The two inline forms predate
//! that rule and share a signature; the reader has to be told which one it
//! is looking at.
//!
//! All control words are 32-bit unsigned integers in target byte order.
//!
//! ## Revision 1: `Inline` (signature `0xdd66_4662`)
//!
//! ```text
//! offset  field
//!      0  signature
//!      4  outbound capacity exponent
//!      8  inbound capacity exponent
//!     12  outbound tail
//!     16  outbound head
//!     20  inbound tail
//!     24  inbound head
//!     28  outbound buffer   (2^out_exp bytes)
//!    ...  inbound buffer    (2^in_exp bytes)
//! ```
//!
//! No revision word and no overflow counter.
//!
//! ## Revision 1 with counter: `InlineCounted` (signature `0xdd66_4662`)
//!
//! ```text
//! offset  field
//!   0-24  as `Inline`
//!     28  overflow counter
//!     32  outbound buffer   (2^out_exp bytes)
//!    ...  inbound buffer    (2^in_exp bytes)
//! ```
//!
//! Shares its signature with `Inline`, so the two cannot be told apart from
//! target memory. Decoders pick one through [`InlineVariant`].
//!
//! ## Revision 2: `Referenced` (signature `0xdd66_4663`)
//!
//! ```text
//! offset  field
//!      0  signature
//!      4  revision (2)
//!      8  outbound capacity exponent
//!     12  inbound capacity exponent
//!     16  outbound tail
//!     20  outbound head
//!     24  inbound tail
//!     28  inbound head
//!     32  overflow counter
//!     36  outbound length   (0 until initialized, then 2^out_exp)
//!     40  inbound length    (0 until initialized, then 2^in_exp)
//!     44  reserved (0)
//!     48  outbound buffer address   (pointer width)
//! 48 + P  inbound buffer address    (pointer width)
//! ```
//!
//! The decoding side of this module ([`Layout::decode`]) is what a probe
//! runs after it has read a candidate header.

use core::fmt;

use thiserror::Error;

use crate::storage::MAX_CAPACITY_EXPONENT;

/// Signature of the inline-buffer layout (`bFf\xdd` in little-endian memory)
pub const INLINE_SIGNATURE: u32 = 0xdd66_4662;

/// Signature of the referenced-buffer layout
pub const REFERENCED_SIGNATURE: u32 = 0xdd66_4663;

/// Bytes a probe must read to tell the revisions apart
pub const PROBE_LEN: usize = 8;

/// Field offsets of the inline layout
pub mod inline {
    /// Signature word
    pub const SIGNATURE: usize = 0;
    /// Outbound capacity exponent
    pub const OUTBOUND_EXPONENT: usize = 4;
    /// Inbound capacity exponent
    pub const INBOUND_EXPONENT: usize = 8;
    /// Outbound tail (probe-owned)
    pub const OUTBOUND_TAIL: usize = 12;
    /// Outbound head (firmware-owned)
    pub const OUTBOUND_HEAD: usize = 16;
    /// Inbound tail (firmware-owned)
    pub const INBOUND_TAIL: usize = 20;
    /// Inbound head (probe-owned)
    pub const INBOUND_HEAD: usize = 24;
    /// First byte of the outbound buffer; the inbound buffer follows it
    pub const OUTBOUND_BUFFER: usize = 28;
    /// Header size
    pub const HEADER_LEN: usize = 28;
}

/// Field offsets of the inline layout with an overflow counter
///
/// Control words up to the inbound head sit where [`inline`] puts them.
pub mod inline_counted {
    pub use super::inline::{
        INBOUND_EXPONENT, INBOUND_HEAD, INBOUND_TAIL, OUTBOUND_EXPONENT, OUTBOUND_HEAD,
        OUTBOUND_TAIL, SIGNATURE,
    };

    /// Outbound overflow counter
    pub const OVERFLOW_COUNTER: usize = 28;
    /// First byte of the outbound buffer; the inbound buffer follows it
    pub const OUTBOUND_BUFFER: usize = 32;
    /// Header size
    pub const HEADER_LEN: usize = 32;
}

/// Field offsets of the referenced layout
pub mod referenced {
    use super::PointerWidth;

    /// Signature word
    pub const SIGNATURE: usize = 0;
    /// Revision word
    pub const REVISION: usize = 4;
    /// Outbound capacity exponent
    pub const OUTBOUND_EXPONENT: usize = 8;
    /// Inbound capacity exponent
    pub const INBOUND_EXPONENT: usize = 12;
    /// Outbound tail (probe-owned)
    pub const OUTBOUND_TAIL: usize = 16;
    /// Outbound head (firmware-owned)
    pub const OUTBOUND_HEAD: usize = 20;
    /// Inbound tail (firmware-owned)
    pub const INBOUND_TAIL: usize = 24;
    /// Inbound head (probe-owned)
    pub const INBOUND_HEAD: usize = 28;
    /// Outbound overflow counter
    pub const OVERFLOW_COUNTER: usize = 32;
    /// Outbound buffer length / initialization flag
    pub const OUTBOUND_LEN: usize = 36;
    /// Inbound buffer length / initialization flag
    pub const INBOUND_LEN: usize = 40;
    /// Reserved word, keeps the addresses 8-byte aligned
    pub const RESERVED: usize = 44;
    /// Outbound buffer address
    pub const OUTBOUND_BUFFER: usize = 48;

    /// Inbound buffer address
    pub const fn inbound_buffer(width: PointerWidth) -> usize {
        OUTBOUND_BUFFER + width.bytes()
    }

    /// Header size
    pub const fn header_len(width: PointerWidth) -> usize {
        OUTBOUND_BUFFER + 2 * width.bytes()
    }
}

/// Revision word stored by the referenced layout
pub const REFERENCED_REVISION: u32 = 2;

/// Direction of a ring
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Target to host
    Outbound,
    /// Host to target
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str("outbound"),
            Direction::Inbound => f.write_str("inbound"),
        }
    }
}

bitflags::bitflags! {
    /// Optional fields present in a layout revision
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct LayoutFeatures: u32 {
        /// Explicit revision word after the signature
        const REVISION_WORD = 1 << 0;
        /// Outbound overflow counter
        const OVERFLOW_COUNTER = 1 << 1;
        /// Length fields that read 0 until the descriptor is initialized
        const INIT_FLAG = 1 << 2;
        /// Buffers live elsewhere and are referenced by address
        const REFERENCED_BUFFERS = 1 << 3;
    }
}

/// Descriptor layout revision
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(u32)]
pub enum Revision {
    /// Buffers stored inline, no overflow counter
    Inline = 1,
    /// Buffers referenced by address, overflow counter and init flag
    Referenced = 2,
    /// Buffers stored inline after an overflow counter
    InlineCounted = 3,
}

/// Which layout an inline signature stands for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum InlineVariant {
    /// No counter, buffers at offset 28
    #[default]
    Plain,
    /// Overflow counter at 28, buffers at offset 32
    Counted,
}

impl Revision {
    /// Select the revision a signature word announces
    pub const fn from_signature(signature: u32) -> Option<Self> {
        match signature {
            INLINE_SIGNATURE => Some(Self::Inline),
            REFERENCED_SIGNATURE => Some(Self::Referenced),
            _ => None,
        }
    }

    /// Select the revision for a signature, resolving the inline signature
    /// with `variant`
    pub const fn resolve(signature: u32, variant: InlineVariant) -> Option<Self> {
        match (Self::from_signature(signature), variant) {
            (Some(Self::Inline), InlineVariant::Counted) => Some(Self::InlineCounted),
            (revision, _) => revision,
        }
    }

    /// Signature word for this revision
    pub const fn signature(self) -> u32 {
        match self {
            Self::Inline | Self::InlineCounted => INLINE_SIGNATURE,
            Self::Referenced => REFERENCED_SIGNATURE,
        }
    }

    /// Optional fields this revision carries
    pub const fn features(self) -> LayoutFeatures {
        match self {
            Self::Inline => LayoutFeatures::empty(),
            Self::InlineCounted => LayoutFeatures::OVERFLOW_COUNTER,
            Self::Referenced => LayoutFeatures::all(),
        }
    }

    /// Bytes of header to read before decoding
    pub const fn header_len(self, width: PointerWidth) -> usize {
        match self {
            Self::Inline => inline::HEADER_LEN,
            Self::InlineCounted => inline_counted::HEADER_LEN,
            Self::Referenced => referenced::header_len(width),
        }
    }
}

/// Target byte order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Endianness {
    /// Little-endian (Cortex-M, RISC-V)
    #[default]
    Little,
    /// Big-endian
    Big,
}

impl Endianness {
    /// Byte order of the machine running this code
    pub const NATIVE: Self = if cfg!(target_endian = "big") {
        Self::Big
    } else {
        Self::Little
    };

    /// Decode a 32-bit word
    pub const fn u32_from(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Encode a 32-bit word
    pub const fn u32_to(self, value: u32) -> [u8; 4] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    /// Decode a 64-bit word
    pub const fn u64_from(self, bytes: [u8; 8]) -> u64 {
        match self {
            Self::Little => u64::from_le_bytes(bytes),
            Self::Big => u64::from_be_bytes(bytes),
        }
    }
}

/// Target pointer width, for buffer address fields
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PointerWidth {
    /// 32-bit addresses
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "32"))]
    Bits32,
    /// 64-bit addresses
    #[cfg_attr(feature = "serde", serde(rename = "64"))]
    Bits64,
}

impl PointerWidth {
    /// Pointer width of the machine running this code
    pub const NATIVE: Self = if core::mem::size_of::<usize>() == 8 {
        Self::Bits64
    } else {
        Self::Bits32
    };

    /// Address size in bytes
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }
}

/// How target words are encoded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Encoding {
    /// Byte order of control words and addresses
    pub endianness: Endianness,
    /// Width of buffer address fields
    pub pointer_width: PointerWidth,
}

impl Encoding {
    /// Encoding of the machine running this code
    pub const NATIVE: Self = Self {
        endianness: Endianness::NATIVE,
        pointer_width: PointerWidth::NATIVE,
    };

    /// Read a control word at `offset`
    pub fn word(&self, bytes: &[u8], offset: usize) -> Option<u32> {
        let raw = bytes.get(offset..offset + 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(raw);
        Some(self.endianness.u32_from(word))
    }

    /// Read an address field at `offset`
    pub fn address(&self, bytes: &[u8], offset: usize) -> Option<u64> {
        match self.pointer_width {
            PointerWidth::Bits32 => self.word(bytes, offset).map(u64::from),
            PointerWidth::Bits64 => {
                let raw = bytes.get(offset..offset + 8)?;
                let mut word = [0u8; 8];
                word.copy_from_slice(raw);
                Some(self.endianness.u64_from(word))
            }
        }
    }
}

/// Header decoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Fewer header bytes than the revision needs
    #[error("header truncated: need {needed} bytes, have {got}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes supplied
        got: usize,
    },

    /// Signature matches no known revision
    #[error("unknown signature {0:#010x}")]
    UnknownSignature(u32),

    /// Revision word disagrees with the signature
    #[error("signature {signature:#010x} announces revision {expected}, header says {found}")]
    RevisionMismatch {
        /// Signature word read
        signature: u32,
        /// Revision the signature implies
        expected: u32,
        /// Revision word read
        found: u32,
    },

    /// Capacity exponent outside `1..=max`
    #[error("invalid {direction} capacity exponent {exponent} (max {max})")]
    InvalidExponent {
        /// Ring concerned
        direction: Direction,
        /// Exponent read
        exponent: u32,
        /// Largest exponent accepted
        max: u32,
    },

    /// Length field still zero: the firmware has not finished initialization
    #[error("{0} buffer not initialized")]
    Uninitialized(Direction),

    /// Length field disagrees with the exponent
    #[error("{direction} buffer length {length} does not match capacity {expected}")]
    LengthMismatch {
        /// Ring concerned
        direction: Direction,
        /// Length read
        length: u32,
        /// `2^exponent`
        expected: u32,
    },

    /// Buffer address is null
    #[error("{0} buffer address is null")]
    NullBuffer(Direction),
}

/// Where one ring's fields live in target memory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingLayout {
    /// Capacity as log2 of the size
    pub exponent: u32,
    /// Address of the head word
    pub head: u64,
    /// Address of the tail word
    pub tail: u64,
    /// Address of the first buffer byte
    pub data: u64,
}

impl RingLayout {
    /// Ring size in bytes
    pub const fn capacity(&self) -> u32 {
        crate::ring::capacity(self.exponent)
    }

    /// Bytes the ring can hold at once
    pub const fn usable_capacity(&self) -> u32 {
        crate::ring::usable_capacity(self.exponent)
    }
}

/// A decoded descriptor, with every field resolved to an absolute address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Address of the signature word
    pub base: u64,
    /// Revision announced by the signature
    pub revision: Revision,
    /// Target -> host ring
    pub outbound: RingLayout,
    /// Host -> target ring
    pub inbound: RingLayout,
    /// Address of the overflow counter, if the revision has one
    pub overflow_counter: Option<u64>,
}

impl Layout {
    /// Decode a header read from `base`
    ///
    /// `header` must hold at least [`Revision::header_len`] bytes for the
    /// revision its signature announces; read [`PROBE_LEN`] bytes first to
    /// find out. Exponents above `max_exponent` (capped at 16) are rejected.
    /// The inline signature is read as [`Revision::Inline`].
    pub fn decode(
        base: u64,
        header: &[u8],
        encoding: Encoding,
        max_exponent: u32,
    ) -> Result<Self, LayoutError> {
        Self::decode_with(base, header, encoding, max_exponent, InlineVariant::Plain)
    }

    /// [`decode`](Self::decode), reading the inline signature as `inline`
    pub fn decode_with(
        base: u64,
        header: &[u8],
        encoding: Encoding,
        max_exponent: u32,
        inline: InlineVariant,
    ) -> Result<Self, LayoutError> {
        let signature = encoding
            .word(header, 0)
            .ok_or(LayoutError::Truncated { needed: 4, got: header.len() })?;
        let revision = Revision::resolve(signature, inline)
            .ok_or(LayoutError::UnknownSignature(signature))?;

        let needed = revision.header_len(encoding.pointer_width);
        if header.len() < needed {
            return Err(LayoutError::Truncated { needed, got: header.len() });
        }

        let max_exponent = max_exponent.min(MAX_CAPACITY_EXPONENT);
        match revision {
            Revision::Inline => decode_inline(base, header, encoding, max_exponent),
            Revision::InlineCounted => decode_inline_counted(base, header, encoding, max_exponent),
            Revision::Referenced => decode_referenced(base, header, encoding, max_exponent),
        }
    }

    /// Optional fields present in this layout
    pub const fn features(&self) -> LayoutFeatures {
        self.revision.features()
    }

    /// Ring for a direction
    pub const fn ring(&self, direction: Direction) -> &RingLayout {
        match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        }
    }
}

fn exponent_at(
    header: &[u8],
    offset: usize,
    encoding: Encoding,
    direction: Direction,
    max: u32,
) -> Result<u32, LayoutError> {
    // Length was checked by the caller
    let exponent = encoding.word(header, offset).unwrap_or(0);
    if exponent == 0 || exponent > max {
        return Err(LayoutError::InvalidExponent { direction, exponent, max });
    }
    Ok(exponent)
}

fn decode_inline(
    base: u64,
    header: &[u8],
    encoding: Encoding,
    max: u32,
) -> Result<Layout, LayoutError> {
    let out_exp = exponent_at(header, inline::OUTBOUND_EXPONENT, encoding, Direction::Outbound, max)?;
    let in_exp = exponent_at(header, inline::INBOUND_EXPONENT, encoding, Direction::Inbound, max)?;

    let outbound_data = base + inline::OUTBOUND_BUFFER as u64;
    let inbound_data = outbound_data + u64::from(crate::ring::capacity(out_exp));

    Ok(Layout {
        base,
        revision: Revision::Inline,
        outbound: RingLayout {
            exponent: out_exp,
            head: base + inline::OUTBOUND_HEAD as u64,
            tail: base + inline::OUTBOUND_TAIL as u64,
            data: outbound_data,
        },
        inbound: RingLayout {
            exponent: in_exp,
            head: base + inline::INBOUND_HEAD as u64,
            tail: base + inline::INBOUND_TAIL as u64,
            data: inbound_data,
        },
        overflow_counter: None,
    })
}

fn decode_inline_counted(
    base: u64,
    header: &[u8],
    encoding: Encoding,
    max: u32,
) -> Result<Layout, LayoutError> {
    use inline_counted as off;

    let out_exp = exponent_at(header, off::OUTBOUND_EXPONENT, encoding, Direction::Outbound, max)?;
    let in_exp = exponent_at(header, off::INBOUND_EXPONENT, encoding, Direction::Inbound, max)?;

    let outbound_data = base + off::OUTBOUND_BUFFER as u64;
    let inbound_data = outbound_data + u64::from(crate::ring::capacity(out_exp));

    Ok(Layout {
        base,
        revision: Revision::InlineCounted,
        outbound: RingLayout {
            exponent: out_exp,
            head: base + off::OUTBOUND_HEAD as u64,
            tail: base + off::OUTBOUND_TAIL as u64,
            data: outbound_data,
        },
        inbound: RingLayout {
            exponent: in_exp,
            head: base + off::INBOUND_HEAD as u64,
            tail: base + off::INBOUND_TAIL as u64,
            data: inbound_data,
        },
        overflow_counter: Some(base + off::OVERFLOW_COUNTER as u64),
    })
}

fn decode_referenced(
    base: u64,
    header: &[u8],
    encoding: Encoding,
    max: u32,
) -> Result<Layout, LayoutError> {
    let revision = encoding.word(header, referenced::REVISION).unwrap_or(0);
    if revision != REFERENCED_REVISION {
        return Err(LayoutError::RevisionMismatch {
            signature: REFERENCED_SIGNATURE,
            expected: REFERENCED_REVISION,
            found: revision,
        });
    }

    let out_exp =
        exponent_at(header, referenced::OUTBOUND_EXPONENT, encoding, Direction::Outbound, max)?;
    let in_exp =
        exponent_at(header, referenced::INBOUND_EXPONENT, encoding, Direction::Inbound, max)?;

    check_length(header, referenced::OUTBOUND_LEN, encoding, Direction::Outbound, out_exp)?;
    check_length(header, referenced::INBOUND_LEN, encoding, Direction::Inbound, in_exp)?;

    let outbound_data = encoding.address(header, referenced::OUTBOUND_BUFFER).unwrap_or(0);
    if outbound_data == 0 {
        return Err(LayoutError::NullBuffer(Direction::Outbound));
    }
    let inbound_data = encoding
        .address(header, referenced::inbound_buffer(encoding.pointer_width))
        .unwrap_or(0);
    if inbound_data == 0 {
        return Err(LayoutError::NullBuffer(Direction::Inbound));
    }

    Ok(Layout {
        base,
        revision: Revision::Referenced,
        outbound: RingLayout {
            exponent: out_exp,
            head: base + referenced::OUTBOUND_HEAD as u64,
            tail: base + referenced::OUTBOUND_TAIL as u64,
            data: outbound_data,
        },
        inbound: RingLayout {
            exponent: in_exp,
            head: base + referenced::INBOUND_HEAD as u64,
            tail: base + referenced::INBOUND_TAIL as u64,
            data: inbound_data,
        },
        overflow_counter: Some(base + referenced::OVERFLOW_COUNTER as u64),
    })
}

fn check_length(
    header: &[u8],
    offset: usize,
    encoding: Encoding,
    direction: Direction,
    exponent: u32,
) -> Result<(), LayoutError> {
    let length = encoding.word(header, offset).unwrap_or(0);
    let expected = crate::ring::capacity(exponent);
    match length {
        0 => Err(LayoutError::Uninitialized(direction)),
        l if l != expected => Err(LayoutError::LengthMismatch { direction, length, expected }),
        _ => Ok(()),
    }
}
