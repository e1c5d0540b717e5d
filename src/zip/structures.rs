use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};
use std::io::{Cursor, Write};
use std::time::SystemTime;

use crate::error::{Error, Result};

/// General purpose flag bit 0: entry is encrypted
pub const FLAG_ENCRYPTED: u16 = 1;
/// General purpose flag bit 11: file name and comment are UTF-8
pub const FLAG_UTF8: u16 = 1 << 11;

/// Version 2.0: deflate and directory entries
pub const VERSION_NEEDED: u16 = 20;
/// Upper byte of "version made by" for Unix hosts
pub const HOST_UNIX: u16 = 3;

/// MS-DOS directory attribute
pub const DOS_DIRECTORY: u32 = 0x10;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

pub(crate) fn truncated(what: &'static str) -> impl Fn(std::io::Error) -> Error {
    move |_| Error::corrupt(format!("truncated {what}"))
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Single-disk EOCD without a comment.
    pub fn new(entries: u16, cd_size: u32, cd_offset: u32) -> Self {
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
            comment_len: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::corrupt("invalid end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let eocd = truncated("end of central directory record");

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>().map_err(&eocd)?,
            disk_with_cd: cursor.read_u16::<LittleEndian>().map_err(&eocd)?,
            disk_entries: cursor.read_u16::<LittleEndian>().map_err(&eocd)?,
            total_entries: cursor.read_u16::<LittleEndian>().map_err(&eocd)?,
            cd_size: cursor.read_u32::<LittleEndian>().map_err(&eocd)?,
            cd_offset: cursor.read_u32::<LittleEndian>().map_err(&eocd)?,
            comment_len: cursor.read_u16::<LittleEndian>().map_err(&eocd)?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.disk_number)?;
        w.write_u16::<LittleEndian>(self.disk_with_cd)?;
        w.write_u16::<LittleEndian>(self.disk_entries)?;
        w.write_u16::<LittleEndian>(self.total_entries)?;
        w.write_u32::<LittleEndian>(self.cd_size)?;
        w.write_u32::<LittleEndian>(self.cd_offset)?;
        w.write_u16::<LittleEndian>(self.comment_len)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::corrupt("invalid ZIP64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let locator = truncated("ZIP64 locator");

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>().map_err(&locator)?,
            eocd64_offset: cursor.read_u64::<LittleEndian>().map_err(&locator)?,
            total_disks: cursor.read_u32::<LittleEndian>().map_err(&locator)?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::corrupt("invalid ZIP64 end of central directory record"));
        }

        // Skip record size, versions and disk numbers
        let mut cursor = Cursor::new(&data[24..]);
        let eocd64 = truncated("ZIP64 end of central directory record");
        let _disk_entries = cursor.read_u64::<LittleEndian>().map_err(&eocd64)?;

        Ok(Self {
            total_entries: cursor.read_u64::<LittleEndian>().map_err(&eocd64)?,
            cd_size: cursor.read_u64::<LittleEndian>().map_err(&eocd64)?,
            cd_offset: cursor.read_u64::<LittleEndian>().map_err(&eocd64)?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// A stored archive member, as written to or read from the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipFileEntry {
    /// Decoded relative path, `/`-separated; directories end with `/`
    pub file_name: String,
    /// File name exactly as stored
    pub raw_name: Vec<u8>,
    pub version_made_by: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub external_attrs: u32,
    pub is_directory: bool,
}

impl ZipFileEntry {
    pub fn is_utf8(&self) -> bool {
        self.flags & FLAG_UTF8 != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Modification time interpreted in the local time zone.
    pub fn modified(&self) -> Option<SystemTime> {
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        let naive = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
            .and_hms_opt(hour as u32, minute as u32, second as u32)?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(SystemTime::from)
    }

    /// Unix `st_mode`, when the entry was made on a Unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attrs >> 16;
        (self.version_made_by >> 8 == HOST_UNIX && mode != 0).then_some(mode)
    }

    /// Write the local file header, file name included.
    ///
    /// Sizes and offsets are truncated to 32 bits; the writer rejects
    /// anything larger before getting here.
    pub fn write_local_header<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(LFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        w.write_u16::<LittleEndian>(self.last_mod_time)?;
        w.write_u16::<LittleEndian>(self.last_mod_date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size as u32)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
        w.write_u16::<LittleEndian>(self.raw_name.len() as u16)?;
        w.write_u16::<LittleEndian>(0)?; // extra field length
        w.write_all(&self.raw_name)
    }

    /// Write the central directory header, file name included.
    pub fn write_central_header<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(CDFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        w.write_u16::<LittleEndian>(self.last_mod_time)?;
        w.write_u16::<LittleEndian>(self.last_mod_date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size as u32)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
        w.write_u16::<LittleEndian>(self.raw_name.len() as u16)?;
        w.write_u16::<LittleEndian>(0)?; // extra field length
        w.write_u16::<LittleEndian>(0)?; // comment length
        w.write_u16::<LittleEndian>(0)?; // disk number start
        w.write_u16::<LittleEndian>(0)?; // internal attributes
        w.write_u32::<LittleEndian>(self.external_attrs)?;
        w.write_u32::<LittleEndian>(self.lfh_offset as u32)?;
        w.write_all(&self.raw_name)
    }
}

/// DOS (date, time) in local time. Clamped to the representable 1980..=2107 range.
pub fn dos_date_time(time: SystemTime) -> (u16, u16) {
    let local: DateTime<Local> = time.into();
    let year = local.year().clamp(1980, 2107);
    if year != local.year() {
        let month_day = if year == 1980 { (1, 1) } else { (12, 31) };
        let time = if year == 1980 { 0 } else { (23 << 11) | (59 << 5) | 29 };
        return (((year - 1980) as u16) << 9 | month_day.0 << 5 | month_day.1, time);
    }

    let date = ((year - 1980) as u16) << 9 | (local.month() as u16) << 5 | local.day() as u16;
    let time = (local.hour() as u16) << 11 | (local.minute() as u16) << 5 | (local.second() as u16 / 2);
    (date, time)
}
