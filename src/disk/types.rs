/// Size of one device sector in bytes.
/// The device only ever moves whole sectors.
pub const SECTOR_SIZE: usize = 512;

/// Sector index on the device (LBA).
pub type SectorId = u32;

/// Number of sectors needed to hold `bytes` bytes.
pub fn sectors_for(bytes: usize) -> u32 {
    ((bytes + SECTOR_SIZE - 1) / SECTOR_SIZE) as u32
}

/// Check a transfer request against the sector granularity, the caller buffer
/// and the device capacity.
pub(crate) fn check_transfer(
    sector: SectorId,
    byte_len: u32,
    buf_len: usize,
    sector_count: u32,
) -> std::io::Result<()> {
    use std::io::{Error, ErrorKind};

    if byte_len == 0 || byte_len as usize % SECTOR_SIZE != 0 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("transfer length {} is not a whole number of sectors", byte_len),
        ));
    }
    if buf_len < byte_len as usize {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("buffer of {} bytes cannot hold {} bytes", buf_len, byte_len),
        ));
    }
    let end = sector as u64 + byte_len as u64 / SECTOR_SIZE as u64;
    if end > sector_count as u64 {
        return Err(Error::new(
            ErrorKind::UnexpectedEof,
            format!("sector range {}..{} beyond device end {}", sector, end, sector_count),
        ));
    }
    Ok(())
}
