use std::path::Path;

use thiserror::Error;

use crate::data::{Coords, PixelGeometry};

/// I/O errors that can occur when reading or writing dataset files
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error reported by the filesystem
    #[error("I/O error on {path}: {message}")]
    File { path: String, message: String },

    /// Requested range exceeds file bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File or directory not found
    #[error("File not found: {0}")]
    NotFound(String),
}

impl IoError {
    /// Wrap a `std::io::Error` raised while operating on `path`.
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(path.display().to_string())
        } else {
            IoError::File {
                path: path.display().to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Errors that can occur when parsing TIFF pages
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42, got {0}")]
    InvalidVersion(u16),

    /// BigTIFF files are recognized but not read
    #[error("BigTIFF files are not supported")]
    UnsupportedBigTiff,

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Pixel data is compressed
    #[error("Unsupported compression: {0} (only uncompressed pages are supported)")]
    UnsupportedCompression(u16),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// Container index or summary block is unreadable
    #[error("Invalid container index: {0}")]
    InvalidIndex(String),

    /// A write would place data beyond the 32-bit offset range
    #[error("Offset {0} exceeds the classic TIFF 4 GiB limit")]
    OffsetOverflow(u64),
}

/// Errors surfaced by builders, storage backends and datastores.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    /// A builder or factory was given a value it cannot represent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested coordinate, file or directory does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend is append-only and already holds this coordinate
    #[error("An image already exists at {0} and this storage does not allow overwrites")]
    DuplicateCoordinate(Coords),

    /// Image coordinate lies outside a fixed, declared extent
    #[error("Image at {coords} exceeds declared length {extent} of axis '{axis}'")]
    ExtentViolation {
        coords: Coords,
        axis: String,
        extent: u32,
    },

    /// Underlying filesystem failure
    #[error("Storage I/O error: {0}")]
    StorageIo(#[from] IoError),

    /// Index or metadata unreadable or inconsistent
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    /// Pixel buffer length does not match the declared geometry
    #[error("Malformed buffer: {geometry} requires {expected} bytes, got {actual}")]
    MalformedBuffer {
        geometry: PixelGeometry,
        expected: usize,
        actual: usize,
    },

    /// Tags attached to a raw acquisition buffer could not be interpreted
    #[error("Could not parse image tags: {0}")]
    TagParse(String),

    /// Operation not valid in the current lifecycle state
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

impl From<TiffError> for DataError {
    fn from(err: TiffError) -> Self {
        match err {
            TiffError::Io(io) => DataError::StorageIo(io),
            other => DataError::CorruptStore(other.to_string()),
        }
    }
}

impl DataError {
    /// Shorthand for the error returned by operations on a closed store.
    pub(crate) fn closed(what: &str) -> Self {
        DataError::IllegalState(format!("{} is closed", what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let io = IoError::from_io(Path::new("/data/img.tif"), err);
        assert!(matches!(io, IoError::NotFound(ref p) if p == "/data/img.tif"));
    }

    #[test]
    fn test_io_error_from_other() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let io = IoError::from_io(Path::new("/data"), err);
        assert!(matches!(io, IoError::File { .. }));
        assert!(io.to_string().contains("denied"));
    }

    #[test]
    fn test_tiff_error_mapping() {
        let io: DataError = TiffError::Io(IoError::NotFound("x".into())).into();
        assert!(matches!(io, DataError::StorageIo(_)));

        let corrupt: DataError = TiffError::InvalidMagic(0).into();
        assert!(matches!(corrupt, DataError::CorruptStore(_)));
    }
}
