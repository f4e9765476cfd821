//! TIFF header and IFD parsing.
//!
//! # Classic TIFF header (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```
//!
//! # IFD layout
//! ```text
//! 2 bytes          entry count N
//! N * 12 bytes     entries: tag u16, type u16, count u32, value/offset u32
//! 4 bytes          offset of next IFD (0 = last)
//! ```
//!
//! BigTIFF (version 43) is recognized and rejected.

use crate::error::TiffError;

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

/// Version number for classic TIFF
pub const VERSION_TIFF: u16 = 42;

/// Version number for BigTIFF
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of one classic IFD entry in bytes
pub const IFD_ENTRY_SIZE: usize = 12;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

impl ByteOrder {
    /// Decode a u16 from the first two bytes of `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than 2.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    /// Decode a u32 from the first four bytes of `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than 4.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed classic TIFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// # Errors
    /// - `FileTooSmall` if fewer than 8 bytes are given
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `UnsupportedBigTiff` for version 43
    /// - `InvalidVersion` for anything other than 42 or 43
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // Read as little-endian because we're checking for specific byte patterns
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        match version {
            VERSION_TIFF => {}
            VERSION_BIGTIFF => return Err(TiffError::UnsupportedBigTiff),
            _ => return Err(TiffError::InvalidVersion(version)),
        }

        let first_ifd_offset = byte_order.read_u32(&bytes[4..8]) as u64;
        if first_ifd_offset < TIFF_HEADER_SIZE as u64 || first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            first_ifd_offset,
        })
    }
}

/// Quick check that `bytes` start with a classic TIFF header.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < TIFF_HEADER_SIZE {
        return false;
    }
    let byte_order = match u16::from_le_bytes([bytes[0], bytes[1]]) {
        BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
        BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
        _ => return false,
    };
    byte_order.read_u16(&bytes[2..4]) == VERSION_TIFF
}

// =============================================================================
// IFD
// =============================================================================

/// One 12-byte entry of an IFD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    /// Raw tag ID
    pub tag: u16,

    /// Field type, `None` when the type is not one we understand
    pub field_type: Option<FieldType>,

    /// Raw field type value
    pub field_type_raw: u16,

    /// Number of values
    pub count: u64,

    /// The 4 value/offset bytes exactly as stored
    pub value_offset_bytes: [u8; 4],

    /// Whether the value is stored in `value_offset_bytes`
    pub is_inline: bool,
}

impl IfdEntry {
    /// Total size of the entry's value in bytes.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|t| t.size_in_bytes() as u64 * self.count)
    }

    /// Offset of an out-of-line value.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        byte_order.read_u32(&self.value_offset_bytes) as u64
    }

    /// Inline scalar Short/Long value.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        if self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u32),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes)),
            _ => None,
        }
    }
}

/// A parsed Image File Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Size in bytes of an IFD with `entry_count` entries.
    #[inline]
    pub const fn calculate_size(entry_count: u64) -> usize {
        2 + entry_count as usize * IFD_ENTRY_SIZE + 4
    }

    /// Parse an IFD from bytes that start at the entry count.
    pub fn parse(bytes: &[u8], byte_order: ByteOrder) -> Result<Self, TiffError> {
        if bytes.len() < 2 {
            return Err(TiffError::FileTooSmall {
                required: 2,
                actual: bytes.len() as u64,
            });
        }
        let count = byte_order.read_u16(&bytes[0..2]) as u64;
        let required = Self::calculate_size(count);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let start = 2 + i * IFD_ENTRY_SIZE;
            let raw = &bytes[start..start + IFD_ENTRY_SIZE];

            let tag = byte_order.read_u16(&raw[0..2]);
            let field_type_raw = byte_order.read_u16(&raw[2..4]);
            let field_type = FieldType::from_u16(field_type_raw);
            let count = byte_order.read_u32(&raw[4..8]) as u64;
            let mut value_offset_bytes = [0u8; 4];
            value_offset_bytes.copy_from_slice(&raw[8..12]);
            let is_inline = field_type.map(|t| t.fits_inline(count)).unwrap_or(false);

            entries.push(IfdEntry {
                tag,
                field_type,
                field_type_raw,
                count,
                value_offset_bytes,
                is_inline,
            });
        }

        let next_start = 2 + count as usize * IFD_ENTRY_SIZE;
        let next_ifd_offset = byte_order.read_u32(&bytes[next_start..next_start + 4]) as u64;

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        let raw = tag.as_u16();
        self.entries.iter().find(|e| e.tag == raw)
    }

    /// Entry for a tag that must be present.
    pub fn require(&self, tag: TiffTag) -> Result<&IfdEntry, TiffError> {
        self.get_entry_by_tag(tag)
            .ok_or(TiffError::MissingTag(tag.name()))
    }
}

// =============================================================================
// Tests
// =============================================================================
