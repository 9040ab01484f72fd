//! File-backed NVM adapter.
//!
//! Keeps an EEPROM image in a host file, one byte of file per byte of
//! device. Useful for host-side tooling that prepares or inspects media for
//! a target, and for long-running simulations that should survive process
//! restarts.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::Nvm;
use crate::error::Result;

/// NVM image stored in a fixed-size host file.
pub struct FileNvm {
    file: File,
    size: usize,
    path: PathBuf,
}

impl FileNvm {
    /// Create a fresh image of `size` bytes, erased to `0xFF`. Truncates an
    /// existing file at the path.
    pub fn create<P: AsRef<Path>>(path: P, size: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&vec![0xFF; size])?;
        file.flush()?;

        Ok(FileNvm {
            file,
            size,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing image; the device size is the file length.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len() as usize;

        Ok(FileNvm {
            file,
            size,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Force the image to durable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl Nvm for FileNvm {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&mut self, addr: usize, buf: &mut [u8]) -> bool {
        let Some(end) = addr.checked_add(buf.len()) else {
            return false;
        };
        if end > self.size {
            return false;
        }
        self.file.seek(SeekFrom::Start(addr as u64)).is_ok() && self.file.read_exact(buf).is_ok()
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> bool {
        let Some(end) = addr.checked_add(data.len()) else {
            return false;
        };
        if end > self.size {
            return false;
        }
        self.file.seek(SeekFrom::Start(addr as u64)).is_ok()
            && self.file.write_all(data).is_ok()
            && self.file.flush().is_ok()
    }
}
