//! On-disk formats for file-backed datasets.
//!
//! - [`tiff`]: classic TIFF page reading and writing
//! - [`mmstack`]: framing of MMStack multipage containers (header offsets,
//!   coordinate index, summary block)
//! - [`detect`]: telling the two directory layouts apart
//!
//! # Format Detection
//!
//! Use [`detect::detect_format`] to identify the layout of a dataset
//! directory before opening it.

pub mod detect;
pub mod mmstack;
pub mod tiff;

pub use detect::{detect_format, DatasetFormat, SINGLE_PLANE_METADATA_FILE};
