//! ZIP archive writer.
//!
//! Entries are written in the order given: a local file header followed by
//! the entry data, then one central directory header per entry and the end
//! of central directory record. Everything stays within 32-bit limits.

use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::collector::Entry;
use crate::encoding::EncodingResolver;
use crate::error::{Error, IoContext, Result};

use super::structures::*;

/// Default deflate level, the strongest.
pub const DEFAULT_LEVEL: u32 = 9;

/// Streams entries into a ZIP container.
pub struct ZipWriter<W> {
    inner: W,
    /// Destination name used in error messages
    dest: PathBuf,
    resolver: EncodingResolver,
    level: u32,
    offset: u64,
    records: Vec<ZipFileEntry>,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    pub fn new(inner: W, dest: impl Into<PathBuf>, resolver: EncodingResolver) -> Self {
        Self {
            inner,
            dest: dest.into(),
            resolver,
            level: DEFAULT_LEVEL,
            offset: 0,
            records: Vec::new(),
        }
    }

    /// Deflate level 1-9; 0 stores every entry uncompressed.
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    /// Records written so far, in archive order.
    pub fn records(&self) -> &[ZipFileEntry] {
        &self.records
    }

    /// Add a collected entry, reading file content from disk.
    pub async fn add_entry(&mut self, entry: &Entry) -> Result<()> {
        if entry.is_dir() {
            return self
                .add_directory(&entry.relative_path, entry.modified, entry.unix_mode)
                .await;
        }

        let data = fs::read(&entry.source).await.at(&entry.source)?;
        self.add_file(&entry.relative_path, &data, entry.modified, entry.unix_mode)
            .await
    }

    /// Add a zero-length directory record; `name` gets a trailing `/`.
    pub async fn add_directory(
        &mut self,
        name: &str,
        modified: Option<SystemTime>,
        unix_mode: Option<u32>,
    ) -> Result<()> {
        let name = format!("{}/", name.trim_end_matches('/'));
        let record = self.record(name, modified, unix_mode, true)?;
        self.write_record(record, &[]).await
    }

    /// Add a file record holding `data`.
    pub async fn add_file(
        &mut self,
        name: &str,
        data: &[u8],
        modified: Option<SystemTime>,
        unix_mode: Option<u32>,
    ) -> Result<()> {
        if data.len() as u64 >= u32::MAX as u64 {
            return Err(Error::TooLarge(name.to_string()));
        }

        let mut record = self.record(name.to_string(), modified, unix_mode, false)?;
        let (method, payload) = self.compress(data).at(&self.dest)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(data);
        record.crc32 = hasher.finalize();
        record.compression_method = method;
        record.compressed_size = payload.len() as u64;
        record.uncompressed_size = data.len() as u64;

        self.write_record(record, &payload).await
    }

    /// Write the central directory and end record, flush, and hand back the sink.
    pub async fn finish(mut self) -> Result<W> {
        let cd_offset = self.offset;
        let mut central = Vec::new();
        for record in &self.records {
            record.write_central_header(&mut central).at(&self.dest)?;
        }

        if cd_offset + central.len() as u64 > u32::MAX as u64 {
            return Err(Error::TooLarge(self.dest.display().to_string()));
        }

        let eocd = EndOfCentralDirectory::new(
            self.records.len() as u16,
            central.len() as u32,
            cd_offset as u32,
        );
        eocd.write_to(&mut central).at(&self.dest)?;

        self.inner.write_all(&central).await.at(&self.dest)?;
        self.inner.flush().await.at(&self.dest)?;
        Ok(self.inner)
    }

    fn record(
        &self,
        name: String,
        modified: Option<SystemTime>,
        unix_mode: Option<u32>,
        is_directory: bool,
    ) -> Result<ZipFileEntry> {
        if self.records.len() >= u16::MAX as usize {
            return Err(Error::TooLarge(format!(
                "{}: more than {} entries",
                self.dest.display(),
                u16::MAX - 1
            )));
        }

        let encoded = self.resolver.encode(&name)?;
        if encoded.bytes.len() > u16::MAX as usize {
            return Err(Error::TooLarge(name));
        }

        let (last_mod_date, last_mod_time) = dos_date_time(modified.unwrap_or_else(SystemTime::now));
        let dos_attrs = if is_directory { DOS_DIRECTORY } else { 0 };
        let (version_made_by, external_attrs) = match unix_mode {
            Some(mode) => (HOST_UNIX << 8 | VERSION_NEEDED, mode << 16 | dos_attrs),
            None => (VERSION_NEEDED, dos_attrs),
        };

        Ok(ZipFileEntry {
            file_name: name,
            raw_name: encoded.bytes,
            version_made_by,
            flags: if encoded.utf8 { FLAG_UTF8 } else { 0 },
            compression_method: CompressionMethod::Stored,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset: self.offset,
            last_mod_time,
            last_mod_date,
            external_attrs,
            is_directory,
        })
    }

    /// Deflate `data`, falling back to STORED when that does not shrink it.
    fn compress(&self, data: &[u8]) -> std::io::Result<(CompressionMethod, Vec<u8>)> {
        if self.level == 0 || data.is_empty() {
            return Ok((CompressionMethod::Stored, data.to_vec()));
        }

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(data)?;
        let deflated = encoder.finish()?;

        if deflated.len() < data.len() {
            Ok((CompressionMethod::Deflate, deflated))
        } else {
            Ok((CompressionMethod::Stored, data.to_vec()))
        }
    }

    async fn write_record(&mut self, record: ZipFileEntry, payload: &[u8]) -> Result<()> {
        if record.lfh_offset >= u32::MAX as u64 {
            return Err(Error::TooLarge(self.dest.display().to_string()));
        }

        let mut header = Vec::with_capacity(LFH_SIZE + record.raw_name.len());
        record.write_local_header(&mut header).at(&self.dest)?;

        self.inner.write_all(&header).await.at(&self.dest)?;
        self.inner.write_all(payload).await.at(&self.dest)?;
        self.offset += (header.len() + payload.len()) as u64;

        debug!(
            name = %record.file_name,
            method = record.compression_method.as_u16(),
            size = record.uncompressed_size,
            compressed = record.compressed_size,
            "Added entry"
        );
        self.records.push(record);
        Ok(())
    }
}

/// Create (or overwrite) the archive at `path` from `entries`.
///
/// An existing file at `path` that also appears among `entries` is skipped,
/// since creating the archive truncates it. On failure the partially written
/// file is removed so nothing claims to be a finished archive. Returns the
/// number of records written.
pub async fn write_archive(
    path: &Path,
    entries: &[Entry],
    resolver: EncodingResolver,
    level: u32,
) -> Result<usize> {
    let entries = without_destination(path, entries).await;
    let result = write_archive_inner(path, &entries, resolver, level).await;
    if result.is_err() {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove incomplete archive {}: {}", path.display(), e);
            }
        }
    }
    result
}

async fn without_destination<'a>(path: &Path, entries: &'a [Entry]) -> Vec<&'a Entry> {
    let Ok(target) = fs::canonicalize(path).await else {
        return entries.iter().collect();
    };

    let mut kept = Vec::with_capacity(entries.len());
    for entry in entries {
        if !entry.is_dir() && fs::canonicalize(&entry.source).await.ok().as_ref() == Some(&target) {
            warn!(
                "Skipping {}: it is the archive being written",
                entry.source.display()
            );
            continue;
        }
        kept.push(entry);
    }
    kept
}

async fn write_archive_inner(
    path: &Path,
    entries: &[&Entry],
    resolver: EncodingResolver,
    level: u32,
) -> Result<usize> {
    let file = fs::File::create(path).await.at(path)?;
    let mut writer = ZipWriter::new(BufWriter::new(file), path, resolver).with_level(level);

    for entry in entries {
        writer.add_entry(entry).await?;
    }

    let count = writer.records().len();
    let mut sink = writer.finish().await?;
    sink.shutdown().await.at(path)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Codepage, EncodingPolicy};

    fn utf8() -> EncodingResolver {
        EncodingResolver::new(EncodingPolicy::Utf8, Codepage::Ibm437)
    }

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[tokio::test]
    async fn empty_archive_is_just_the_end_record() {
        let writer = ZipWriter::new(Vec::new(), "empty.zip", utf8());
        let bytes = writer.finish().await.unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(&bytes[0..4], EndOfCentralDirectory::SIGNATURE);
    }

    #[tokio::test]
    async fn stored_file_layout() {
        let mut writer = ZipWriter::new(Vec::new(), "t.zip", utf8()).with_level(0);
        writer.add_file("f1", b"content", None, None).await.unwrap();
        let bytes = writer.finish().await.unwrap();

        // local header
        assert_eq!(&bytes[0..4], LFH_SIGNATURE);
        assert_eq!(u16_at(&bytes, 6), FLAG_UTF8);
        assert_eq!(u16_at(&bytes, 8), 0);
        assert_eq!(u32_at(&bytes, 14), crc32fast::hash(b"content"));
        assert_eq!(u32_at(&bytes, 18), 7);
        assert_eq!(u32_at(&bytes, 22), 7);
        assert_eq!(&bytes[30..32], b"f1");
        assert_eq!(&bytes[32..39], b"content");

        // central directory right after the data
        assert_eq!(&bytes[39..43], CDFH_SIGNATURE);
        assert_eq!(u32_at(&bytes, 39 + 42), 0);

        // end record
        let eocd = EndOfCentralDirectory::from_bytes(&bytes[bytes.len() - 22..]).unwrap();
        assert_eq!(eocd.total_entries, 1);
        assert_eq!(eocd.cd_offset, 39);
        assert_eq!(eocd.cd_size, (CDFH_MIN_SIZE + 2) as u32);
    }

    #[tokio::test]
    async fn compressible_data_is_deflated() {
        let data = vec![b'a'; 4096];
        let mut writer = ZipWriter::new(Vec::new(), "t.zip", utf8());
        writer.add_file("big", &data, None, None).await.unwrap();
        writer.add_file("tiny", b"x", None, None).await.unwrap();

        let records = writer.records();
        assert_eq!(records[0].compression_method, CompressionMethod::Deflate);
        assert!(records[0].compressed_size < 4096);
        assert_eq!(records[1].compression_method, CompressionMethod::Stored);
        assert_eq!(records[1].lfh_offset, (LFH_SIZE + 3) as u64 + records[0].compressed_size);
    }

    #[tokio::test]
    async fn directories_get_a_trailing_slash_and_attributes() {
        let mut writer = ZipWriter::new(Vec::new(), "t.zip", utf8());
        writer.add_directory("d1", None, Some(0o040755)).await.unwrap();
        let record = &writer.records()[0];
        assert_eq!(record.raw_name, b"d1/");
        assert!(record.is_directory);
        assert_eq!(record.uncompressed_size, 0);
        assert_eq!(record.external_attrs, 0o040755 << 16 | DOS_DIRECTORY);
        assert_eq!(record.unix_mode(), Some(0o040755));
    }

    #[tokio::test]
    async fn legacy_policy_reports_unencodable_names() {
        let resolver = EncodingResolver::new(EncodingPolicy::Legacy, Codepage::Ibm437);
        let mut writer = ZipWriter::new(Vec::new(), "t.zip", resolver);
        let err = writer.add_file("文件1", b"x", None, None).await.unwrap_err();
        assert!(matches!(err, Error::UnencodableName { .. }));
        assert!(writer.records().is_empty());
    }

    #[tokio::test]
    async fn failed_write_removes_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("out.zip");
        let entries = vec![Entry {
            source: dir.path().join("vanished"),
            relative_path: "vanished".to_string(),
            kind: crate::collector::EntryKind::File,
            modified: None,
            unix_mode: None,
        }];

        let err = write_archive(&archive, &entries, utf8(), DEFAULT_LEVEL)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!archive.exists());
    }
}
