use flate2::read::DeflateDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::encoding::EncodingResolver;
use crate::error::{Error, IoContext, Result};
use crate::io::ReadAt;

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>, resolver: EncodingResolver) -> Self {
        Self {
            parser: ZipParser::new(reader, resolver),
        }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Extract file data to memory, verifying size and CRC-32
    pub async fn extract_to_memory(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        if entry.is_encrypted() {
            return Err(Error::Encrypted(entry.file_name.clone()));
        }

        let data_offset = self.parser.get_data_offset(entry).await?;
        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.parser.reader().read_at(data_offset, &mut raw).await?;

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => inflate(&raw, entry)?,
            CompressionMethod::Unknown(method) => {
                return Err(Error::UnsupportedCompression {
                    name: entry.file_name.clone(),
                    method,
                });
            }
        };

        if data.len() as u64 != entry.uncompressed_size {
            return Err(Error::corrupt(format!(
                "'{}': expected {} bytes, got {}",
                entry.file_name,
                entry.uncompressed_size,
                data.len()
            )));
        }

        let actual = crc32fast::hash(&data);
        if actual != entry.crc32 {
            return Err(Error::ChecksumMismatch {
                name: entry.file_name.clone(),
                expected: entry.crc32,
                actual,
            });
        }

        Ok(data)
    }

    /// Extract file to disk, restoring its modification time and Unix mode
    ///
    /// The content is staged in a temporary file beside `output_path` and
    /// renamed over it, so an existing file is replaced even when it is
    /// read-only.
    pub async fn extract_to_file(&self, entry: &ZipFileEntry, output_path: &Path) -> Result<()> {
        let parent = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).await.at(parent)?;

        // Nothing touches the disk until the content has been verified
        let data = self.extract_to_memory(entry).await?;

        let staged = tempfile::Builder::new()
            .prefix(".zipwrap-")
            .tempfile_in(parent)
            .at(parent)?;
        let handle = staged.as_file().try_clone().at(staged.path())?;
        let mut file = fs::File::from_std(handle);
        file.write_all(&data).await.at(staged.path())?;
        file.flush().await.at(staged.path())?;
        drop(file);

        if let Some(modified) = entry.modified() {
            if let Err(e) = staged.as_file().set_modified(modified) {
                debug!("Cannot set modification time of {}: {}", output_path.display(), e);
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Permission bits only; setuid, setgid and sticky are not restored
            if let Some(mode) = entry.unix_mode() {
                let permissions = std::fs::Permissions::from_mode(mode & 0o777);
                staged
                    .as_file()
                    .set_permissions(permissions)
                    .at(output_path)?;
            }
        }

        staged
            .persist(output_path)
            .map_err(|e| Error::io(output_path, e.error))?;
        Ok(())
    }

    /// Recreate one archive member beneath `dest`.
    ///
    /// Returns the path written. Names that would escape `dest` are
    /// rejected with [`Error::UnsafePath`].
    pub async fn extract_entry(&self, entry: &ZipFileEntry, dest: &Path) -> Result<PathBuf> {
        let relative = safe_relative_path(&entry.file_name)?;
        let target = dest.join(&relative);

        if entry.is_directory {
            fs::create_dir_all(&target).await.at(&target)?;
        } else {
            if relative.as_os_str().is_empty() {
                return Err(Error::UnsafePath(entry.file_name.clone()));
            }
            self.extract_to_file(entry, &target).await?;
        }

        debug!(name = %entry.file_name, target = %target.display(), "Extracted entry");
        Ok(target)
    }

    /// Extract every member, in central directory order, beneath `dest`.
    ///
    /// `dest` is created if missing. Existing files are overwritten, so
    /// extracting the same archive twice leaves identical contents.
    pub async fn extract_all(&self, dest: &Path) -> Result<usize> {
        self.extract_all_with(dest, |_| {}).await
    }

    /// Like [`extract_all`](Self::extract_all), calling `on_entry` before
    /// each member is written.
    pub async fn extract_all_with<F>(&self, dest: &Path, mut on_entry: F) -> Result<usize>
    where
        F: FnMut(&ZipFileEntry),
    {
        fs::create_dir_all(dest).await.at(dest)?;

        let entries = self.list_files().await?;
        for entry in &entries {
            on_entry(entry);
            self.extract_entry(entry, dest).await?;
        }
        Ok(entries.len())
    }
}

fn inflate(raw: &[u8], entry: &ZipFileEntry) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(entry.uncompressed_size.min(1 << 24) as usize);
    // One byte of slack exposes entries longer than declared
    DeflateDecoder::new(raw)
        .take(entry.uncompressed_size + 1)
        .read_to_end(&mut data)
        .map_err(|e| Error::corrupt(format!("'{}': {}", entry.file_name, e)))?;
    Ok(data)
}

/// Turn a stored name into a relative path that stays under the destination.
///
/// Rejects absolute names, drive prefixes and `..` segments; drops empty and
/// `.` segments.
pub fn safe_relative_path(name: &str) -> Result<PathBuf> {
    let unsafe_path = || {
        warn!("Unsafe path detected in archive: {}", name);
        Error::UnsafePath(name.to_string())
    };

    if name.starts_with('/') || name.starts_with('\\') {
        return Err(unsafe_path());
    }

    let mut path = PathBuf::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(unsafe_path()),
            _ if segment.contains(':') || segment.chars().any(char::is_control) => {
                return Err(unsafe_path());
            }
            _ => path.push(segment),
        }
    }
    Ok(path)
}
