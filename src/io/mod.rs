mod local;
mod memory;

pub use local::LocalFileReader;
pub use memory::MemoryReader;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Trait for random access reading from an archive source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// A read extending past [`size`](Self::size) is a corrupt-archive error,
    /// since every offset we read comes from archive metadata.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

pub(crate) fn check_bounds(offset: u64, len: usize, size: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::corrupt(format!(
            "read of {len} bytes at offset {offset} exceeds archive size {size}"
        ))),
    }
}
