use std::{
    fs::{File, OpenOptions},
    io::{Error, ErrorKind, Read, Result, Seek, SeekFrom, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use crate::disk::{
    block_device::BlockDevice,
    types::{check_transfer, SectorId, SECTOR_SIZE},
};

/// A disk image file used as a sector device.
#[derive(Debug)]
pub struct FileDisk {
    file: Mutex<File>,
    sector_count: u32,
}

impl FileDisk {
    /// Open (or create) the image at `path`, growing it to `disk_size` bytes
    /// if it is smaller. Returns the disk and whether the image was new or
    /// had to be grown.
    pub fn open(path: impl AsRef<Path>, disk_size: u64) -> Result<(Self, bool)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;

        let current = file.metadata()?.len();
        let grown = current < disk_size;
        if grown {
            // new area reads back as zeros
            file.set_len(disk_size)?;
        }
        let len = current.max(disk_size);

        Ok((
            Self {
                file: Mutex::new(file),
                sector_count: (len / SECTOR_SIZE as u64) as u32,
            },
            grown,
        ))
    }

    fn file(&self) -> Result<MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|_| Error::new(ErrorKind::Other, "disk image lock poisoned"))
    }
}

impl BlockDevice for FileDisk {
    fn read(&self, sector: SectorId, byte_len: u32, out: &mut [u8]) -> Result<()> {
        check_transfer(sector, byte_len, out.len(), self.sector_count)?;
        let mut file = self.file()?;
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
        file.read_exact(&mut out[..byte_len as usize])?;
        Ok(())
    }

    fn write(&self, sector: SectorId, byte_len: u32, buf: &[u8]) -> Result<()> {
        check_transfer(sector, byte_len, buf.len(), self.sector_count)?;
        let mut file = self.file()?;
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
        file.write_all(&buf[..byte_len as usize])?;
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sector_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_grows_image_and_persists_sectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let (disk, grown) = FileDisk::open(&path, 64 * 1024).unwrap();
        assert!(grown);
        assert_eq!(disk.sector_count(), 128);

        let data = [0xABu8; 1024];
        disk.write(10, 1024, &data).unwrap();
        drop(disk);

        let (disk, grown) = FileDisk::open(&path, 64 * 1024).unwrap();
        assert!(!grown);
        let mut out = [0u8; 1024];
        disk.read(10, 1024, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_rejects_partial_sector_and_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let (disk, _) = FileDisk::open(dir.path().join("d.img"), 4096).unwrap();
        let mut buf = [0u8; 1024];
        assert_eq!(
            disk.read(0, 100, &mut buf).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            disk.read(7, 1024, &mut buf).unwrap_err().kind(),
            ErrorKind::UnexpectedEof
        );
    }
}
