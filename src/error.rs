//! Error type shared by the collector, writer, reader and extractor.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can stop an archive or extract operation.
///
/// Every variant names the path or archive record it concerns so the
/// binaries can report it verbatim.
#[derive(Debug, Error)]
pub enum Error {
    /// A literal source path does not exist.
    #[error("No such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    /// A wildcard source matched nothing.
    #[error("No files matched pattern: {0}")]
    NoMatch(String),

    #[error("Invalid wildcard pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A file name has no representation in the legacy codepage.
    #[error("Cannot encode '{name}' as {codepage}")]
    UnencodableName { name: String, codepage: &'static str },

    /// Stored file name bytes are malformed for their declared encoding.
    #[error("Invalid {codepage} file name bytes: {bytes:02x?}")]
    InvalidEncoding {
        bytes: Vec<u8>,
        codepage: &'static str,
    },

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Checksum mismatch for '{name}': expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// An archive member would land outside the destination root.
    #[error("Refusing to extract unsafe path: {0}")]
    UnsafePath(String),

    #[error("Unsupported compression method {method} for '{name}'")]
    UnsupportedCompression { name: String, method: u16 },

    #[error("Encrypted entries are not supported: '{0}'")]
    Encrypted(String),

    /// The entry or archive needs ZIP64, which the writer does not produce.
    #[error("Too large for a ZIP archive without ZIP64: {0}")]
    TooLarge(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Error::CorruptArchive(reason.into())
    }
}

/// Attach a path to a bare `std::io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
