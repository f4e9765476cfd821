//! MMStack multipage container framing.
//!
//! A container is a little-endian classic TIFF whose header is followed by
//! two tagged offsets, and whose tail holds an index from coordinates to
//! page IFDs plus the dataset summary:
//!
//! ```text
//! 0..8    TIFF header "II" 42 <first IFD offset>
//! 8..12   INDEX_MAP_OFFSET_HEADER
//! 12..16  index map offset (0 until the file is finalized)
//! 16..20  SUMMARY_OFFSET_HEADER
//! 20..24  summary offset (0 until the file is finalized)
//! 24..    pages
//! trailer INDEX_MAP_HEADER, entry count,
//!         entries [ifd offset u32][axis count u16]([name len u16][name][index u32])*
//!         SUMMARY_HEADER, summary length u32, summary JSON
//! ```

use crate::data::Coords;
use crate::error::TiffError;
use crate::io::RangeReader;

use super::tiff::{encode_header, is_tiff_header, TIFF_HEADER_SIZE};

pub const INDEX_MAP_OFFSET_HEADER: u32 = 54773648;
pub const INDEX_MAP_HEADER: u32 = 3453623;
pub const SUMMARY_OFFSET_HEADER: u32 = 2355492;
pub const SUMMARY_HEADER: u32 = 2355491;

/// Bytes before the first page.
pub const CONTAINER_HEADER_SIZE: usize = TIFF_HEADER_SIZE + 16;

/// Offset of the first-IFD field inside the header.
pub const FIRST_IFD_FIELD_OFFSET: u64 = 4;

/// Offset of the index/summary offset block inside the header.
pub const OFFSETS_FIELD_OFFSET: u64 = TIFF_HEADER_SIZE as u64;

/// One index entry: where the page for `coords` starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub coords: Coords,
    pub ifd_offset: u32,
}

impl IndexEntry {
    /// Encoded size of this entry in the trailer.
    pub fn encoded_len(&self) -> u64 {
        let axes: u64 = self
            .coords
            .nonzero()
            .map(|(name, _)| 2 + name.len() as u64 + 4)
            .sum();
        4 + 2 + axes
    }
}

/// Contents of a finalized container's trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIndex {
    pub entries: Vec<IndexEntry>,
    pub summary_json: String,
}

/// Header for a fresh container with no pages yet.
pub fn encode_container_header() -> [u8; CONTAINER_HEADER_SIZE] {
    let mut header = [0u8; CONTAINER_HEADER_SIZE];
    header[..TIFF_HEADER_SIZE].copy_from_slice(&encode_header(0));
    header[8..12].copy_from_slice(&INDEX_MAP_OFFSET_HEADER.to_le_bytes());
    header[16..20].copy_from_slice(&SUMMARY_OFFSET_HEADER.to_le_bytes());
    header
}

/// Whether `bytes` start with a container header.
pub fn is_container_header(bytes: &[u8]) -> bool {
    bytes.len() >= 12
        && bytes.starts_with(b"II")
        && is_tiff_header(bytes)
        && u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) == INDEX_MAP_OFFSET_HEADER
}

/// The 16-byte block written at [`OFFSETS_FIELD_OFFSET`] when finalizing.
pub fn encode_offsets(index_offset: u32, summary_offset: u32) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[0..4].copy_from_slice(&INDEX_MAP_OFFSET_HEADER.to_le_bytes());
    block[4..8].copy_from_slice(&index_offset.to_le_bytes());
    block[8..12].copy_from_slice(&SUMMARY_OFFSET_HEADER.to_le_bytes());
    block[12..16].copy_from_slice(&summary_offset.to_le_bytes());
    block
}

/// Size of the trailer for the given index and summary.
pub fn trailer_len(index_len: u64, summary_len: usize) -> u64 {
    8 + index_len + 8 + summary_len as u64
}

/// Encoded trailer plus the absolute offsets of its two blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTrailer {
    pub bytes: Vec<u8>,
    pub index_offset: u32,
    pub summary_offset: u32,
}

/// Encode the trailer to be written at absolute offset `start`.
pub fn encode_trailer(
    start: u64,
    entries: &[IndexEntry],
    summary_json: &str,
) -> Result<EncodedTrailer, TiffError> {
    let index_len: u64 = entries.iter().map(IndexEntry::encoded_len).sum();
    let total = trailer_len(index_len, summary_json.len());
    if start.saturating_add(total) > u32::MAX as u64 {
        return Err(TiffError::OffsetOverflow(start.saturating_add(total)));
    }

    let mut bytes = Vec::with_capacity(total as usize);
    bytes.extend_from_slice(&INDEX_MAP_HEADER.to_le_bytes());
    bytes.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        bytes.extend_from_slice(&entry.ifd_offset.to_le_bytes());
        let axes: Vec<(&str, u32)> = entry.coords.nonzero().collect();
        bytes.extend_from_slice(&(axes.len() as u16).to_le_bytes());
        for (name, index) in axes {
            bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
            bytes.extend_from_slice(&index.to_le_bytes());
        }
    }

    let summary_offset = start + bytes.len() as u64;
    bytes.extend_from_slice(&SUMMARY_HEADER.to_le_bytes());
    bytes.extend_from_slice(&(summary_json.len() as u32).to_le_bytes());
    bytes.extend_from_slice(summary_json.as_bytes());

    Ok(EncodedTrailer {
        bytes,
        index_offset: start as u32,
        summary_offset: summary_offset as u32,
    })
}

/// Read the index and summary of a finalized container.
///
/// Only the header and trailer are read. A file whose index offset is still
/// zero was never finalized and is reported as `InvalidIndex`.
pub async fn read_container<R: RangeReader + ?Sized>(
    reader: &R,
) -> Result<ContainerIndex, TiffError> {
    let size = reader.size();
    if size < CONTAINER_HEADER_SIZE as u64 {
        return Err(TiffError::FileTooSmall {
            required: CONTAINER_HEADER_SIZE as u64,
            actual: size,
        });
    }

    let header = reader.read_exact_at(0, CONTAINER_HEADER_SIZE).await?;
    if !is_container_header(&header) {
        return Err(TiffError::InvalidIndex(format!(
            "{} is not an MMStack container",
            reader.identifier()
        )));
    }
    if le_u32(&header, 16) != SUMMARY_OFFSET_HEADER {
        return Err(TiffError::InvalidIndex("missing summary offset header".into()));
    }

    let index_offset = le_u32(&header, 12) as u64;
    let summary_offset = le_u32(&header, 20) as u64;
    if index_offset == 0 {
        return Err(TiffError::InvalidIndex(format!(
            "{} was not closed properly (no index)",
            reader.identifier()
        )));
    }
    if index_offset < CONTAINER_HEADER_SIZE as u64
        || summary_offset <= index_offset
        || summary_offset >= size
    {
        return Err(TiffError::InvalidIndex(format!(
            "index offset {} / summary offset {} outside file of {} bytes",
            index_offset, summary_offset, size
        )));
    }

    let trailer = reader
        .read_exact_at(index_offset, (size - index_offset) as usize)
        .await?;
    let mut cursor = Cursor::new(&trailer);

    if cursor.u32()? != INDEX_MAP_HEADER {
        return Err(TiffError::InvalidIndex("missing index map header".into()));
    }
    let count = cursor.u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let ifd_offset = cursor.u32()?;
        let axis_count = cursor.u16()?;
        let mut builder = Coords::builder();
        for _ in 0..axis_count {
            let name_len = cursor.u16()? as usize;
            let name = std::str::from_utf8(cursor.take(name_len)?)
                .map_err(|e| TiffError::InvalidIndex(e.to_string()))?;
            let index = cursor.u32()?;
            builder = builder
                .index(name, index as i64)
                .map_err(|e| TiffError::InvalidIndex(e.to_string()))?;
        }
        entries.push(IndexEntry {
            coords: builder.build(),
            ifd_offset,
        });
    }

    if index_offset + cursor.position() as u64 != summary_offset {
        return Err(TiffError::InvalidIndex(
            "index map does not end at the summary block".into(),
        ));
    }
    if cursor.u32()? != SUMMARY_HEADER {
        return Err(TiffError::InvalidIndex("missing summary header".into()));
    }
    let summary_len = cursor.u32()? as usize;
    let summary_json = std::str::from_utf8(cursor.take(summary_len)?)
        .map_err(|e| TiffError::InvalidIndex(e.to_string()))?
        .to_string();

    Ok(ContainerIndex {
        entries,
        summary_json,
    })
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], TiffError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| TiffError::InvalidIndex("trailer is truncated".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, TiffError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, TiffError> {
        let b = self.take(4)?;
        Ok(le_u32(b, 0))
    }
}
