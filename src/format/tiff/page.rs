//! Reading uncompressed strip-organized image pages.

use bytes::{Bytes, BytesMut};

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, Ifd};
use super::tags::{TiffTag, COMPRESSION_NONE};
use super::values::ValueReader;

/// Upper bound on IFD entries accepted for a single page.
const MAX_PAGE_ENTRIES: u64 = 512;

/// Structure of one image page, read from its IFD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiffPage {
    pub ifd_offset: u64,
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u32,
    pub bits_per_sample: Vec<u32>,
    pub strip_offsets: Vec<u32>,
    pub strip_byte_counts: Vec<u32>,

    /// Contents of the MicroManagerMetadata tag, if present
    pub payload: Option<String>,

    pub next_ifd_offset: u64,
}

impl TiffPage {
    /// Parse the IFD at `ifd_offset` and the tag values it references.
    ///
    /// Pixel data is not read.
    pub async fn read<R: RangeReader + ?Sized>(
        reader: &R,
        byte_order: ByteOrder,
        ifd_offset: u64,
    ) -> Result<Self, TiffError> {
        if ifd_offset < 8 {
            return Err(TiffError::InvalidIfdOffset(ifd_offset));
        }

        let count_bytes = reader.read_exact_at(ifd_offset, 2).await?;
        let entry_count = byte_order.read_u16(&count_bytes) as u64;
        if entry_count == 0 || entry_count > MAX_PAGE_ENTRIES {
            return Err(TiffError::InvalidIfdOffset(ifd_offset));
        }

        let ifd_bytes = reader
            .read_exact_at(ifd_offset, Ifd::calculate_size(entry_count))
            .await?;
        let ifd = Ifd::parse(&ifd_bytes, byte_order)?;
        let values = ValueReader::new(reader, byte_order);

        let compression = match ifd.get_entry_by_tag(TiffTag::Compression) {
            Some(entry) => values.read_u32(TiffTag::Compression, entry).await?,
            None => COMPRESSION_NONE as u32,
        };
        if compression != COMPRESSION_NONE as u32 {
            return Err(TiffError::UnsupportedCompression(compression as u16));
        }

        let width = values
            .read_u32(TiffTag::ImageWidth, ifd.require(TiffTag::ImageWidth)?)
            .await?;
        let height = values
            .read_u32(TiffTag::ImageLength, ifd.require(TiffTag::ImageLength)?)
            .await?;
        let samples_per_pixel = match ifd.get_entry_by_tag(TiffTag::SamplesPerPixel) {
            Some(entry) => values.read_u32(TiffTag::SamplesPerPixel, entry).await?,
            None => 1,
        };
        let bits_per_sample = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => values.read_u32_array(TiffTag::BitsPerSample, entry).await?,
            None => vec![1],
        };

        let strip_offsets = values
            .read_u32_array(TiffTag::StripOffsets, ifd.require(TiffTag::StripOffsets)?)
            .await?;
        let strip_byte_counts = values
            .read_u32_array(
                TiffTag::StripByteCounts,
                ifd.require(TiffTag::StripByteCounts)?,
            )
            .await?;
        if strip_offsets.len() != strip_byte_counts.len() {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::StripByteCounts.name(),
                message: format!(
                    "{} strip offsets but {} byte counts",
                    strip_offsets.len(),
                    strip_byte_counts.len()
                ),
            });
        }

        let payload = match ifd.get_entry_by_tag(TiffTag::MicroManagerMetadata) {
            Some(entry) => Some(
                values
                    .read_string(TiffTag::MicroManagerMetadata, entry)
                    .await?,
            ),
            None => None,
        };

        Ok(Self {
            ifd_offset,
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            strip_offsets,
            strip_byte_counts,
            payload,
            next_ifd_offset: ifd.next_ifd_offset,
        })
    }

    /// Total pixel bytes across all strips.
    pub fn pixel_len(&self) -> u64 {
        self.strip_byte_counts.iter().map(|&c| c as u64).sum()
    }

    /// Read and concatenate the page's strips.
    pub async fn read_pixels<R: RangeReader + ?Sized>(&self, reader: &R) -> Result<Bytes, TiffError> {
        if let ([offset], [count]) = (self.strip_offsets.as_slice(), self.strip_byte_counts.as_slice()) {
            return Ok(reader.read_exact_at(*offset as u64, *count as usize).await?);
        }

        let mut pixels = BytesMut::with_capacity(self.pixel_len() as usize);
        for (&offset, &count) in self.strip_offsets.iter().zip(&self.strip_byte_counts) {
            let strip = reader.read_exact_at(offset as u64, count as usize).await?;
            pixels.extend_from_slice(&strip);
        }
        Ok(pixels.freeze())
    }
}
