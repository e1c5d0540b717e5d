//! ZIP archive writing, parsing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`writer`]: Serializes collected entries into a new archive
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`extractor`]: Verified extraction into a destination directory
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! File names are raw bytes; general-purpose bit 11 marks them as UTF-8.
//! How names are produced and interpreted is decided by the
//! [`EncodingResolver`](crate::EncodingResolver) each writer and parser is
//! built with.
//!
//! ## Supported Features
//!
//! - STORED (no compression) and DEFLATE methods
//! - Reading the ZIP64 end of central directory
//! - Unix permissions and DOS modification times
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - The writer never emits ZIP64 records

pub mod extractor;
pub mod parser;
pub mod structures;
pub mod writer;

pub use extractor::{safe_relative_path, ZipExtractor};
pub use parser::ZipParser;
pub use structures::*;
pub use writer::{write_archive, ZipWriter, DEFAULT_LEVEL};
