//! Appending pages to one MMStack container file.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::data::{Coords, Image};
use crate::error::{DataError, IoError};
use crate::format::mmstack::{
    encode_container_header, encode_offsets, encode_trailer, trailer_len, IndexEntry,
    CONTAINER_HEADER_SIZE, FIRST_IFD_FIELD_OFFSET, OFFSETS_FIELD_OFFSET,
};
use crate::format::tiff::{encode_page, encoded_page_len, sample_layout};

/// An open container being appended to.
///
/// Pages are written back to back after the header. The trailer is written
/// by [`finalize`](Self::finalize) directly after the last page and may be
/// rewritten any number of times; it never moves the page data.
pub(super) struct ContainerWriter {
    path: PathBuf,
    file_id: usize,
    file: File,
    pages_end: u64,
    next_ifd_field: u64,
    entries: Vec<IndexEntry>,
    index_len: u64,
}

impl ContainerWriter {
    /// Create `path` (which must not exist) and write the container header.
    pub async fn create(path: PathBuf, file_id: usize) -> Result<Self, DataError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| IoError::from_io(&path, e))?;
        file.write_all(&encode_container_header())
            .await
            .map_err(|e| IoError::from_io(&path, e))?;
        file.flush().await.map_err(|e| IoError::from_io(&path, e))?;

        Ok(Self {
            path,
            file_id,
            file,
            pages_end: CONTAINER_HEADER_SIZE as u64,
            next_ifd_field: FIRST_IFD_FIELD_OFFSET,
            entries: Vec::new(),
            index_len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_id(&self) -> usize {
        self.file_id
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes the file would occupy after appending a page of `page_len`
    /// bytes for `coords` and finalizing with a summary of `summary_len`.
    pub fn projected_len(&self, page_len: u64, coords: &Coords, summary_len: usize) -> u64 {
        let entry = IndexEntry {
            coords: coords.clone(),
            ifd_offset: 0,
        };
        self.pages_end + page_len + trailer_len(self.index_len + entry.encoded_len(), summary_len)
    }

    /// Bytes the file occupies once finalized with a summary of
    /// `summary_len` bytes.
    pub fn finalized_len(&self, summary_len: usize) -> u64 {
        self.pages_end + trailer_len(self.index_len, summary_len)
    }

    /// Append `image` with its JSON `payload`. Returns the page's IFD offset
    /// once the bytes are flushed.
    pub async fn append(&mut self, image: &Image, payload: &str) -> Result<u64, DataError> {
        let page = encode_page(self.pages_end, image.pixels(), &image.geometry(), payload)?;

        self.write_at(self.pages_end, &page.bytes).await?;
        let link = (page.ifd_offset as u32).to_le_bytes();
        self.write_at(self.next_ifd_field, &link).await?;
        self.file
            .flush()
            .await
            .map_err(|e| IoError::from_io(&self.path, e))?;

        self.pages_end = page.end_offset();
        self.next_ifd_field = page.next_ifd_field_offset;
        let entry = IndexEntry {
            coords: image.coords().clone(),
            ifd_offset: page.ifd_offset as u32,
        };
        self.index_len += entry.encoded_len();
        self.entries.push(entry);

        Ok(page.ifd_offset)
    }

    /// Write (or rewrite) the index and summary trailer and record their
    /// offsets in the header.
    pub async fn finalize(&mut self, summary_json: &str) -> Result<(), DataError> {
        let trailer = encode_trailer(self.pages_end, &self.entries, summary_json)?;
        self.write_at(self.pages_end, &trailer.bytes).await?;
        self.file
            .set_len(self.pages_end + trailer.bytes.len() as u64)
            .await
            .map_err(|e| IoError::from_io(&self.path, e))?;
        self.write_at(
            OFFSETS_FIELD_OFFSET,
            &encode_offsets(trailer.index_offset, trailer.summary_offset),
        )
        .await?;
        self.file
            .sync_all()
            .await
            .map_err(|e| IoError::from_io(&self.path, e))?;
        Ok(())
    }

    async fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), DataError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::from_io(&self.path, e))?;
        self.file
            .write_all(bytes)
            .await
            .map_err(|e| IoError::from_io(&self.path, e))?;
        Ok(())
    }
}

/// Encoded size of the page that [`ContainerWriter::append`] would write.
pub(super) fn page_len(image: &Image, payload: &str) -> u64 {
    let (samples, _) = sample_layout(&image.geometry());
    encoded_page_len(image.pixels().len(), payload.len(), samples)
}

/// Size of a finalized container that holds no pages.
pub(super) fn empty_container_len(summary_len: usize) -> u64 {
    CONTAINER_HEADER_SIZE as u64 + trailer_len(0, summary_len)
}
