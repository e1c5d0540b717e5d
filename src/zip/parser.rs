//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for the real counts and offsets
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Every count, size and offset taken from the archive is checked against
//! the others before it is used, so a damaged archive surfaces as
//! [`Error::CorruptArchive`] rather than as a short read or a panic.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::encoding::EncodingResolver;
use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Location and size of the central directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralDirectory {
    pub offset: u64,
    pub size: u64,
    pub total_entries: u64,
}

/// Low-level ZIP file parser.
///
/// Generic over the reader type so archives can be parsed from disk or
/// from memory. File names are decoded with the [`EncodingResolver`] given
/// at construction.
///
/// ## Usage
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor)
/// rather than directly.
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
    resolver: EncodingResolver,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>, resolver: EncodingResolver) -> Self {
        let size = reader.size();
        Self {
            reader,
            size,
            resolver,
        }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file, possibly followed by
    /// a comment of up to 64 KiB. The common no-comment case is checked
    /// first; otherwise the tail is scanned backwards for a signature whose
    /// comment length reaches exactly to the end of the file.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(Error::corrupt("file too small to be a ZIP archive"));
        }

        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_at(offset, &mut buf).await?;

        // Check for signature and zero-length comment
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_at(search_start, &mut buf).await?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(Error::corrupt("end of central directory signature not found"))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::corrupt("missing ZIP64 end of central directory locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_at(locator_offset, &mut locator_buf).await?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;
        if locator.eocd64_offset >= locator_offset {
            return Err(Error::corrupt("ZIP64 end of central directory out of range"));
        }

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Locate the central directory and check it fits before the end record.
    pub async fn central_directory(&self) -> Result<CentralDirectory> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd, limit) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            let cd = CentralDirectory {
                offset: eocd64.cd_offset,
                size: eocd64.cd_size,
                total_entries: eocd64.total_entries,
            };
            (cd, eocd_offset - Zip64EOCDLocator::SIZE as u64)
        } else {
            if eocd.disk_number != 0 || eocd.disk_with_cd != 0 {
                return Err(Error::corrupt("multi-volume archives are not supported"));
            }
            if eocd.disk_entries != eocd.total_entries {
                return Err(Error::corrupt(format!(
                    "entry counts disagree: {} on this disk, {} in total",
                    eocd.disk_entries, eocd.total_entries
                )));
            }
            let cd = CentralDirectory {
                offset: eocd.cd_offset as u64,
                size: eocd.cd_size as u64,
                total_entries: eocd.total_entries as u64,
            };
            (cd, eocd_offset)
        };

        match cd.offset.checked_add(cd.size) {
            Some(end) if end <= limit => {}
            _ => {
                return Err(Error::corrupt(format!(
                    "central directory ({} bytes at {}) overlaps the end record at {}",
                    cd.size, cd.offset, limit
                )));
            }
        }

        // Every header takes at least CDFH_MIN_SIZE bytes
        if cd.total_entries > cd.size / CDFH_MIN_SIZE as u64 {
            return Err(Error::corrupt(format!(
                "{} entries cannot fit in a {} byte central directory",
                cd.total_entries, cd.size
            )));
        }

        Ok(cd)
    }

    /// List all files in the ZIP archive.
    ///
    /// Reads the whole Central Directory in one request and parses exactly
    /// the declared number of headers from it. Leftover bytes mean the
    /// declared count is wrong.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let cd = self.central_directory().await?;

        let mut cd_data = vec![0u8; cd.size as usize];
        self.reader.read_at(cd.offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(cd.total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for index in 0..cd.total_entries {
            let entry = self.parse_cdfh(&mut cursor).map_err(|e| match e {
                Error::CorruptArchive(reason) => Error::corrupt(format!(
                    "central directory entry {index} of {}: {reason}",
                    cd.total_entries
                )),
                other => other,
            })?;
            self.validate(&entry, cd.offset)?;
            entries.push(entry);
        }

        if cursor.position() != cd.size {
            return Err(Error::corrupt(format!(
                "declared {} entries but the central directory holds {} more bytes",
                cd.total_entries,
                cd.size - cursor.position()
            )));
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header from a cursor.
    fn parse_cdfh(&self, cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
        let short = truncated("central directory header");

        // Read and verify the signature (PK\x01\x02)
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig).map_err(&short)?;
        if sig != CDFH_SIGNATURE {
            return Err(Error::corrupt("invalid central directory header signature"));
        }

        // Read fixed-size header fields
        let version_made_by = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let _version_needed = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let flags = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let compression_method = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let last_mod_time = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let last_mod_date = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let crc32 = cursor.read_u32::<LittleEndian>().map_err(&short)?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>().map_err(&short)? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(&short)? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let extra_field_length = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let file_comment_length = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>().map_err(&short)?;
        let external_attrs = cursor.read_u32::<LittleEndian>().map_err(&short)?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>().map_err(&short)? as u64;

        let mut raw_name = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut raw_name).map_err(&short)?;

        // Names from DOS-era tools may use backslashes
        let file_name = self
            .resolver
            .decode(&raw_name, flags & FLAG_UTF8 != 0)?
            .replace('\\', "/");
        let is_directory = file_name.ends_with('/');

        // Parse extra field for ZIP64 extended information (ID 0x0001)
        let extra_field_end = cursor.position() + extra_field_length as u64;
        if extra_field_end > cursor.get_ref().len() as u64 {
            return Err(Error::corrupt("extra field runs past the central directory"));
        }

        while cursor.position() + 4 <= extra_field_end {
            let header_id = cursor.read_u16::<LittleEndian>().map_err(&short)?;
            let field_size = cursor.read_u16::<LittleEndian>().map_err(&short)?;
            let field_end = (cursor.position() + field_size as u64).min(extra_field_end);

            if header_id == 0x0001 {
                // Fields are present only if corresponding header field is 0xFFFFFFFF
                if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    uncompressed_size = cursor.read_u64::<LittleEndian>().map_err(&short)?;
                }
                if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    compressed_size = cursor.read_u64::<LittleEndian>().map_err(&short)?;
                }
                if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    lfh_offset = cursor.read_u64::<LittleEndian>().map_err(&short)?;
                }
            }
            cursor.set_position(field_end);
        }

        cursor.set_position(extra_field_end);

        // Skip over the file comment (we don't use it)
        let comment_end = cursor.position() + file_comment_length as u64;
        if comment_end > cursor.get_ref().len() as u64 {
            return Err(Error::corrupt("file comment runs past the central directory"));
        }
        cursor.set_position(comment_end);

        Ok(ZipFileEntry {
            file_name,
            raw_name,
            version_made_by,
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
            external_attrs,
            is_directory,
        })
    }

    /// Reject entries whose data cannot lie before the central directory.
    fn validate(&self, entry: &ZipFileEntry, cd_offset: u64) -> Result<()> {
        let data_end = entry
            .lfh_offset
            .checked_add(LFH_SIZE as u64)
            .and_then(|end| end.checked_add(entry.compressed_size));

        match data_end {
            Some(end) if end <= cd_offset => {}
            _ => {
                return Err(Error::corrupt(format!(
                    "'{}': {} bytes at offset {} overrun the central directory at {}",
                    entry.file_name, entry.compressed_size, entry.lfh_offset, cd_offset
                )));
            }
        }

        if entry.compression_method == CompressionMethod::Stored
            && entry.compressed_size != entry.uncompressed_size
        {
            return Err(Error::corrupt(format!(
                "'{}': stored entry has compressed size {} but uncompressed size {}",
                entry.file_name, entry.compressed_size, entry.uncompressed_size
            )));
        }

        Ok(())
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader.read_at(entry.lfh_offset, &mut lfh_buf).await?;

        // Verify LFH signature (PK\x03\x04)
        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::corrupt(format!(
                "'{}': invalid local file header at offset {}",
                entry.file_name, entry.lfh_offset
            )));
        }

        // Read the variable field lengths from fixed positions in LFH
        let file_name_length = u16::from_le_bytes([lfh_buf[26], lfh_buf[27]]) as u64;
        let extra_field_length = u16::from_le_bytes([lfh_buf[28], lfh_buf[29]]) as u64;

        // Data starts after: LFH (30 bytes) + filename + extra field
        Ok(entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}
