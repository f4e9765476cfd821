//! Classic TIFF reading and writing for uncompressed image pages.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian, MM = big-endian)
//!   in the header. Pages are always written little-endian but either order is read.
//!
//! - **IFD (Image File Directory)**: Describes one page: dimensions, sample layout, where
//!   its pixel strips live, and the page's JSON payload (tag 51123).
//!
//! - **Inline vs offset values**: Small values are stored inline in the IFD entry,
//!   larger values are stored at an offset pointed to by the entry.

mod page;
mod parser;
mod tags;
mod values;
mod writer;

pub use page::TiffPage;
pub use parser::{is_tiff_header, ByteOrder, Ifd, IfdEntry, TiffHeader, TIFF_HEADER_SIZE};
pub use tags::{FieldType, TiffTag};
pub use values::{parse_u32_array, ValueReader};
pub use writer::{encode_header, encode_page, encoded_page_len, sample_layout, EncodedPage};
