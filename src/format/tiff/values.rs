//! TIFF tag value reading.
//!
//! Values are either inline in the IFD entry (four bytes or fewer) or stored
//! at an offset elsewhere in the file. Out-of-line values are fetched with a
//! single range read each.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry};
use super::tags::{FieldType, TiffTag};

/// Reads tag values through a [`RangeReader`] using a file's byte order.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    byte_order: ByteOrder,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, byte_order: ByteOrder) -> Self {
        Self { reader, byte_order }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Raw bytes of an entry's value, inline or fetched.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ))
        } else {
            let offset = entry.value_offset(self.byte_order);
            Ok(self.reader.read_exact_at(offset, size as usize).await?)
        }
    }

    /// Single Short or Long value.
    pub async fn read_u32(&self, tag: TiffTag, entry: &IfdEntry) -> Result<u32, TiffError> {
        if let Some(value) = entry.inline_u32(self.byte_order) {
            return Ok(value);
        }
        let values = self.read_u32_array(tag, entry).await?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected count 1, got {}", entry.count),
            }),
        }
    }

    /// Array of Short or Long values, widened to u32.
    pub async fn read_u32_array(
        &self,
        tag: TiffTag,
        entry: &IfdEntry,
    ) -> Result<Vec<u32>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        match field_type {
            FieldType::Short | FieldType::Long => {
                Ok(parse_u32_array(&bytes, field_type, self.byte_order))
            }
            other => Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected Short or Long, got {:?}", other),
            }),
        }
    }

    /// ASCII value with the NUL terminator stripped.
    pub async fn read_string(&self, tag: TiffTag, entry: &IfdEntry) -> Result<String, TiffError> {
        if entry.field_type != Some(FieldType::Ascii) {
            return Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected Ascii, got type {}", entry.field_type_raw),
            });
        }

        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8(bytes[..end].to_vec()).map_err(|e| TiffError::InvalidTagValue {
            tag: tag.name(),
            message: e.to_string(),
        })
    }
}

/// Parse Short or Long values from raw bytes. Other types yield nothing.
pub fn parse_u32_array(bytes: &[u8], field_type: FieldType, byte_order: ByteOrder) -> Vec<u32> {
    match field_type {
        FieldType::Short => bytes
            .chunks_exact(2)
            .map(|c| byte_order.read_u16(c) as u32)
            .collect(),
        FieldType::Long => bytes
            .chunks_exact(4)
            .map(|c| byte_order.read_u32(c))
            .collect(),
        _ => Vec::new(),
    }
}
