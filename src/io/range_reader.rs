use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Positional reads from a dataset file.
///
/// Page and container readers only ever touch the ranges they need, so
/// opening a dataset never loads whole files. Implementations must be
/// thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size of the file in bytes.
    fn size(&self) -> u64;

    /// Identifier used in log lines and error messages.
    fn identifier(&self) -> &str;

    /// Up to `max_len` bytes from the start of the file. Shorter files yield
    /// everything they have.
    async fn read_head(&self, max_len: usize) -> Result<Bytes, IoError> {
        let len = usize::try_from(self.size()).map_or(max_len, |size| size.min(max_len));
        self.read_exact_at(0, len).await
    }
}
