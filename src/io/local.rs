use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{check_bounds, ReadAt};
use crate::error::{IoContext, Result};

/// Local file reader with random access support
pub struct LocalFileReader {
    file: std::fs::File,
    path: PathBuf,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).at(path)?;
        let size = file.metadata().at(path)?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.size)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(buf, offset).at(&self.path)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            // seek_read may return short counts
            let mut filled = 0;
            while filled < buf.len() {
                let n = self
                    .file
                    .seek_read(&mut buf[filled..], offset + filled as u64)
                    .at(&self.path)?;
                if n == 0 {
                    return Err(crate::Error::io(
                        &self.path,
                        std::io::ErrorKind::UnexpectedEof.into(),
                    ));
                }
                filled += n;
            }
            Ok(())
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset)).at(&self.path)?;
            file.read_exact(buf).at(&self.path)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}
