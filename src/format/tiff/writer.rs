//! Encoding uncompressed image pages as little-endian classic TIFF.
//!
//! A page is laid out as
//! ```text
//! [pixel strip][pad][payload, NUL terminated][pad][BitsPerSample array][IFD]
//! ```
//! with every block starting on a word boundary. Offsets stored in the IFD
//! are absolute, so the encoder must know where in the file the page starts.

use crate::data::PixelGeometry;
use crate::error::TiffError;

use super::parser::{Ifd, TIFF_HEADER_SIZE, VERSION_TIFF};
use super::tags::{
    FieldType, TiffTag, COMPRESSION_NONE, PHOTOMETRIC_BLACK_IS_ZERO, PHOTOMETRIC_RGB,
};

/// Number of IFD entries written for every page.
const PAGE_ENTRY_COUNT: u64 = 10;

/// Little-endian classic TIFF header pointing at `first_ifd_offset`.
pub fn encode_header(first_ifd_offset: u32) -> [u8; TIFF_HEADER_SIZE] {
    let mut header = [0u8; TIFF_HEADER_SIZE];
    header[0..2].copy_from_slice(b"II");
    header[2..4].copy_from_slice(&VERSION_TIFF.to_le_bytes());
    header[4..8].copy_from_slice(&first_ifd_offset.to_le_bytes());
    header
}

/// Samples per pixel and bits per sample describing `geometry`.
///
/// Pixels whose byte count is not a multiple of the component count (RGB32
/// is 4 bytes for 3 components) are written with an extra padding sample so
/// that the samples always cover `bytes_per_pixel` exactly.
pub fn sample_layout(geometry: &PixelGeometry) -> (u16, u16) {
    let bytes_per_sample = (geometry.bytes_per_pixel / geometry.components).max(1);
    let samples = geometry.bytes_per_pixel / bytes_per_sample;
    (samples as u16, (bytes_per_sample * 8) as u16)
}

/// An encoded page ready to be written at the offset it was encoded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPage {
    pub bytes: Vec<u8>,

    /// Absolute offset of the page's IFD
    pub ifd_offset: u64,

    /// Absolute offset of the IFD's next-IFD field, patched when another
    /// page follows
    pub next_ifd_field_offset: u64,
}

impl EncodedPage {
    /// Absolute offset just past the page.
    pub fn end_offset(&self) -> u64 {
        self.ifd_offset + Ifd::calculate_size(PAGE_ENTRY_COUNT) as u64
    }
}

/// Encoded size of a page without building it.
pub fn encoded_page_len(pixel_len: usize, payload_len: usize, samples: u16) -> u64 {
    let mut len = padded(pixel_len as u64);
    len += padded(payload_len as u64 + 1);
    if samples > 2 {
        len += padded(samples as u64 * 2);
    }
    len + Ifd::calculate_size(PAGE_ENTRY_COUNT) as u64
}

/// Encode one page starting at absolute offset `start`.
///
/// `start` must be even. Fails with `OffsetOverflow` when any part of the
/// page would land beyond the 32-bit offset range.
pub fn encode_page(
    start: u64,
    pixels: &[u8],
    geometry: &PixelGeometry,
    payload: &str,
) -> Result<EncodedPage, TiffError> {
    let (samples, bits) = sample_layout(geometry);
    let total = encoded_page_len(pixels.len(), payload.len(), samples);
    let end = start
        .checked_add(total)
        .filter(|&end| end <= u32::MAX as u64)
        .ok_or(TiffError::OffsetOverflow(start.saturating_add(total)))?;

    let mut bytes = Vec::with_capacity(total as usize);

    let strip_offset = start;
    bytes.extend_from_slice(pixels);
    pad(&mut bytes);

    let payload_offset = start + bytes.len() as u64;
    bytes.extend_from_slice(payload.as_bytes());
    bytes.push(0);
    pad(&mut bytes);
    let payload_count = payload.len() as u32 + 1;

    let bits_value = if samples > 2 {
        let offset = start + bytes.len() as u64;
        for _ in 0..samples {
            bytes.extend_from_slice(&bits.to_le_bytes());
        }
        pad(&mut bytes);
        (offset as u32).to_le_bytes()
    } else {
        let mut inline = [0u8; 4];
        for i in 0..samples as usize {
            inline[i * 2..i * 2 + 2].copy_from_slice(&bits.to_le_bytes());
        }
        inline
    };

    let payload_value = if FieldType::Ascii.fits_inline(payload_count as u64) {
        let mut inline = [0u8; 4];
        inline[..payload.len()].copy_from_slice(payload.as_bytes());
        inline
    } else {
        (payload_offset as u32).to_le_bytes()
    };

    let photometric = if geometry.components >= 3 {
        PHOTOMETRIC_RGB
    } else {
        PHOTOMETRIC_BLACK_IS_ZERO
    };

    let ifd_offset = start + bytes.len() as u64;
    bytes.extend_from_slice(&(PAGE_ENTRY_COUNT as u16).to_le_bytes());
    push_long(&mut bytes, TiffTag::ImageWidth, geometry.width);
    push_long(&mut bytes, TiffTag::ImageLength, geometry.height);
    push_entry(&mut bytes, TiffTag::BitsPerSample, FieldType::Short, samples as u32, bits_value);
    push_short(&mut bytes, TiffTag::Compression, COMPRESSION_NONE);
    push_short(&mut bytes, TiffTag::PhotometricInterpretation, photometric);
    push_long(&mut bytes, TiffTag::StripOffsets, strip_offset as u32);
    push_short(&mut bytes, TiffTag::SamplesPerPixel, samples);
    push_long(&mut bytes, TiffTag::RowsPerStrip, geometry.height);
    push_long(&mut bytes, TiffTag::StripByteCounts, pixels.len() as u32);
    push_entry(
        &mut bytes,
        TiffTag::MicroManagerMetadata,
        FieldType::Ascii,
        payload_count,
        payload_value,
    );
    let next_ifd_field_offset = start + bytes.len() as u64;
    bytes.extend_from_slice(&0u32.to_le_bytes());

    debug_assert_eq!(start + bytes.len() as u64, end);

    Ok(EncodedPage {
        bytes,
        ifd_offset,
        next_ifd_field_offset,
    })
}

#[inline]
fn padded(len: u64) -> u64 {
    len + (len & 1)
}

fn pad(bytes: &mut Vec<u8>) {
    if bytes.len() % 2 == 1 {
        bytes.push(0);
    }
}

fn push_entry(bytes: &mut Vec<u8>, tag: TiffTag, field_type: FieldType, count: u32, value: [u8; 4]) {
    bytes.extend_from_slice(&tag.as_u16().to_le_bytes());
    bytes.extend_from_slice(&(field_type as u16).to_le_bytes());
    bytes.extend_from_slice(&count.to_le_bytes());
    bytes.extend_from_slice(&value);
}

fn push_short(bytes: &mut Vec<u8>, tag: TiffTag, value: u16) {
    let mut inline = [0u8; 4];
    inline[0..2].copy_from_slice(&value.to_le_bytes());
    push_entry(bytes, tag, FieldType::Short, 1, inline);
}

fn push_long(bytes: &mut Vec<u8>, tag: TiffTag, value: u32) {
    push_entry(bytes, tag, FieldType::Long, 1, value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tiff::{ByteOrder, TiffHeader, TiffPage};
    use crate::io::{LocalFileReader, RangeReader};

    async fn write_single_page(
        pixels: &[u8],
        geometry: &PixelGeometry,
        payload: &str,
    ) -> (tempfile::TempDir, LocalFileReader, EncodedPage) {
        let page = encode_page(TIFF_HEADER_SIZE as u64, pixels, geometry, payload).unwrap();
        let mut file = encode_header(page.ifd_offset as u32).to_vec();
        file.extend_from_slice(&page.bytes);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.tif");
        tokio::fs::write(&path, &file).await.unwrap();
        let reader = LocalFileReader::open(&path).await.unwrap();
        (dir, reader, page)
    }

    #[test]
    fn test_sample_layout() {
        let gray16 = PixelGeometry::gray(4, 4, 2).unwrap();
        assert_eq!(sample_layout(&gray16), (1, 16));

        let rgb32 = PixelGeometry::new(4, 4, 4, 3).unwrap();
        assert_eq!(sample_layout(&rgb32), (4, 8));

        let rgb64 = PixelGeometry::new(4, 4, 8, 3).unwrap();
        assert_eq!(sample_layout(&rgb64), (4, 16));
    }

    #[test]
    fn test_encoded_length_matches_prediction() {
        let geometry = PixelGeometry::gray(3, 1, 1).unwrap();
        let page = encode_page(8, &[1, 2, 3], &geometry, "{\"k\":1}").unwrap();
        assert_eq!(page.bytes.len() as u64, encoded_page_len(3, 7, 1));
        assert_eq!(page.ifd_offset % 2, 0);
        assert_eq!(page.end_offset(), 8 + page.bytes.len() as u64);
        assert_eq!(page.next_ifd_field_offset, page.end_offset() - 4);
    }

    #[test]
    fn test_offset_overflow() {
        let geometry = PixelGeometry::gray(2, 2, 1).unwrap();
        let result = encode_page(u32::MAX as u64 - 10, &[0; 4], &geometry, "{}");
        assert!(matches!(result, Err(TiffError::OffsetOverflow(_))));
    }

    #[tokio::test]
    async fn test_page_reads_back() {
        let geometry = PixelGeometry::gray(4, 3, 2).unwrap();
        let pixels: Vec<u8> = (0..24).collect();
        let payload = r#"{"coords":{"channel":1}}"#;
        let (_dir, reader, page) = write_single_page(&pixels, &geometry, payload).await;

        let header_bytes = reader.read_exact_at(0, 8).await.unwrap();
        let header = TiffHeader::parse(&header_bytes, reader.size()).unwrap();
        assert_eq!(header.byte_order, ByteOrder::LittleEndian);
        assert_eq!(header.first_ifd_offset, page.ifd_offset);

        let parsed = TiffPage::read(&reader, header.byte_order, header.first_ifd_offset)
            .await
            .unwrap();
        assert_eq!(parsed.width, 4);
        assert_eq!(parsed.height, 3);
        assert_eq!(parsed.samples_per_pixel, 1);
        assert_eq!(parsed.bits_per_sample, vec![16]);
        assert_eq!(parsed.payload.as_deref(), Some(payload));
        assert_eq!(parsed.next_ifd_offset, 0);
        assert_eq!(parsed.read_pixels(&reader).await.unwrap().as_ref(), &pixels[..]);
    }

    #[tokio::test]
    async fn test_rgb_page_reads_back() {
        let geometry = PixelGeometry::new(2, 2, 4, 3).unwrap();
        let pixels = vec![7u8; 16];
        let (_dir, reader, page) = write_single_page(&pixels, &geometry, "{}").await;

        let parsed = TiffPage::read(&reader, ByteOrder::LittleEndian, page.ifd_offset)
            .await
            .unwrap();
        assert_eq!(parsed.samples_per_pixel, 4);
        assert_eq!(parsed.bits_per_sample, vec![8, 8, 8, 8]);
        assert_eq!(parsed.payload.as_deref(), Some("{}"));
        assert_eq!(parsed.pixel_len(), 16);
    }
}
