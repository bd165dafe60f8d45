use std::io::Result;

use crate::disk::types::SectorId;

/// Synchronous sector device underneath the filesystem.
///
/// `byte_len` is always a whole number of sectors; the call blocks until the
/// transfer is complete.
pub trait BlockDevice: Send + Sync {
    fn read(&self, sector: SectorId, byte_len: u32, out: &mut [u8]) -> Result<()>;
    fn write(&self, sector: SectorId, byte_len: u32, buf: &[u8]) -> Result<()>;
    fn sector_count(&self) -> u32;
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn read(&self, sector: SectorId, byte_len: u32, out: &mut [u8]) -> Result<()> {
        (**self).read(sector, byte_len, out)
    }

    fn write(&self, sector: SectorId, byte_len: u32, buf: &[u8]) -> Result<()> {
        (**self).write(sector, byte_len, buf)
    }

    fn sector_count(&self) -> u32 {
        (**self).sector_count()
    }
}
