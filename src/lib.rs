//! # zipwrap
//!
//! A small zip/unzip pair built around three guarantees: directory trees
//! round-trip with their structure intact, sources may be selected with
//! shell-style wildcards, and non-ASCII file names survive the trip under an
//! explicitly chosen encoding policy.
//!
//! ## Pipeline
//!
//! - [`collector`] expands source arguments into an ordered entry list
//! - [`ZipWriter`] serializes the entries into a ZIP container
//! - [`ZipParser`] reads the central directory back
//! - [`ZipExtractor`] recreates the tree beneath a destination directory
//!
//! File names go through an [`EncodingResolver`]: under
//! [`EncodingPolicy::Utf8`] they are stored as UTF-8 with general-purpose
//! bit 11 set, under [`EncodingPolicy::Legacy`] in the locale codepage with
//! the bit clear. The policy is picked once, by the binary that runs
//! (`zip`/`unzip` or `zipa`/`unzipa`).
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use zipwrap::{
//!     collector, write_archive, EncodingPolicy, EncodingResolver, LocalFileReader, SourceSpec,
//!     ZipExtractor, DEFAULT_LEVEL,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> zipwrap::Result<()> {
//!     let resolver = EncodingResolver::from_env(EncodingPolicy::Utf8);
//!
//!     let entries = collector::collect(&[SourceSpec::parse("docs/*")])?;
//!     write_archive(Path::new("docs.zip"), &entries, resolver, DEFAULT_LEVEL).await?;
//!
//!     let reader = Arc::new(LocalFileReader::new(Path::new("docs.zip"))?);
//!     ZipExtractor::new(reader, resolver).extract_all(Path::new("out")).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod collector;
pub mod encoding;
pub mod error;
pub mod io;
pub mod zip;

pub use collector::{Entry, EntryKind, SourceSpec};
pub use encoding::{Codepage, EncodedName, EncodingPolicy, EncodingResolver};
pub use error::{Error, Result};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use zip::{write_archive, ZipExtractor, ZipFileEntry, ZipParser, ZipWriter, DEFAULT_LEVEL};
