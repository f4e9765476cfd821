//! File access for dataset readers.
//!
//! Readers go through [`RangeReader`] so that a page can be decoded from a
//! handful of positional reads. [`LocalFileReader`] is the only
//! implementation; tests use in-memory mocks.

mod file_reader;
mod range_reader;

pub use file_reader::LocalFileReader;
pub use range_reader::RangeReader;
