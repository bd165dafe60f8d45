use std::{
    io::{Error, ErrorKind, Result},
    sync::{Mutex, MutexGuard},
};

use crate::disk::{
    block_device::BlockDevice,
    types::{check_transfer, SectorId, SECTOR_SIZE},
};

/// In-memory sector device. Starts zero-filled like a fresh image file.
#[derive(Debug)]
pub struct RamDisk {
    bytes: Mutex<Vec<u8>>,
    sector_count: u32,
}

impl RamDisk {
    pub fn new(sector_count: u32) -> Self {
        Self {
            bytes: Mutex::new(vec![0; sector_count as usize * SECTOR_SIZE]),
            sector_count,
        }
    }

    /// RamDisk large enough for `bytes` bytes.
    pub fn with_capacity(bytes: u64) -> Self {
        Self::new(((bytes + SECTOR_SIZE as u64 - 1) / SECTOR_SIZE as u64) as u32)
    }

    /// Copy of the raw image, for inspection.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(self.bytes()?.clone())
    }

    fn bytes(&self) -> Result<MutexGuard<'_, Vec<u8>>> {
        self.bytes
            .lock()
            .map_err(|_| Error::new(ErrorKind::Other, "ram disk lock poisoned"))
    }
}

impl BlockDevice for RamDisk {
    fn read(&self, sector: SectorId, byte_len: u32, out: &mut [u8]) -> Result<()> {
        check_transfer(sector, byte_len, out.len(), self.sector_count)?;
        let start = sector as usize * SECTOR_SIZE;
        let len = byte_len as usize;
        out[..len].copy_from_slice(&self.bytes()?[start..start + len]);
        Ok(())
    }

    fn write(&self, sector: SectorId, byte_len: u32, buf: &[u8]) -> Result<()> {
        check_transfer(sector, byte_len, buf.len(), self.sector_count)?;
        let start = sector as usize * SECTOR_SIZE;
        let len = byte_len as usize;
        self.bytes()?[start..start + len].copy_from_slice(&buf[..len]);
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
    fn test_read_back_written_sectors() {
        let disk = RamDisk::new(8);
        let mut data = vec![0u8; 1024];
        data[0] = 1;
        data[1023] = 2;
        disk.write(2, 1024, &data).unwrap();

        let mut out = vec![0u8; 1024];
        disk.read(2, 1024, &mut out).unwrap();
        assert_eq!(out, data);

        // neighbours untouched
        disk.read(0, 1024, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let disk = RamDisk::new(8);
        let mut out = [0u8; 512];
        let err = disk.read(0, 1024, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_with_capacity_rounds_up() {
        assert_eq!(RamDisk::with_capacity(1025).sector_count(), 3);
    }
}
