use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    disk::{BlockDevice, SECTOR_SIZE},
    fs::{
        config::{
            div_round_up, BASE_BLOCK_SIZE, EXT2_SIGNATURE, MAX_BLOCK_SIZE_LOG2, SUPER_BLOCK_OFFSET,
            SUPER_BLOCK_SIZE,
        },
        decode, encode_into,
        error::{FsError, Result},
    },
    utils::current_timestamp,
};

/// Leading part of the on-disk superblock, field for field.
/// The remaining bytes of the 1024-byte record are carried through untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RawSuperBlock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    /// Block number holding the superblock (1 for 1 KiB blocks, else 0)
    pub first_data_block: u32,
    /// Block size = 1024 << log_block_size
    pub log_block_size: u32,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    pub mount_time: u32,
    pub write_time: u32,
    pub mount_count: u16,
    pub max_mount_count: u16,
    pub signature: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub last_check: u32,
    pub check_interval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    // revision 1 fields
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
}

impl RawSuperBlock {
    /// Encoded length of the fields above.
    pub const SIZE: usize = 136;
}

/// Cached superblock of a mounted volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub raw: RawSuperBlock,
    image: Vec<u8>,
}

impl SuperBlock {
    /// First sector of the superblock record.
    pub const SECTOR: u32 = (SUPER_BLOCK_OFFSET / SECTOR_SIZE) as u32;

    /// Wrap a freshly built record; nothing is written until `persist`.
    pub fn new(raw: RawSuperBlock) -> Self {
        Self {
            raw,
            image: vec![0; SUPER_BLOCK_SIZE],
        }
    }

    /// Load the superblock sectors and validate the signature.
    pub fn parse<D: BlockDevice>(device: &D) -> Result<Self> {
        let mut image = vec![0u8; SUPER_BLOCK_SIZE];
        device.read(Self::SECTOR, SUPER_BLOCK_SIZE as u32, &mut image)?;
        let raw: RawSuperBlock = decode(&image[..RawSuperBlock::SIZE])?;

        if raw.signature != EXT2_SIGNATURE {
            return Err(FsError::InvalidSuperblock(raw.signature));
        }
        if raw.log_block_size > MAX_BLOCK_SIZE_LOG2 {
            return Err(FsError::Corrupted(format!(
                "unsupported block size log {}",
                raw.log_block_size
            )));
        }
        if raw.blocks_per_group == 0 || raw.inodes_per_group == 0 {
            return Err(FsError::Corrupted(
                "zero blocks or inodes per group".to_string(),
            ));
        }
        // each group's bitmaps live in a single block
        let bits_per_block = (BASE_BLOCK_SIZE << raw.log_block_size) * 8;
        if raw.blocks_per_group > bits_per_block || raw.inodes_per_group > bits_per_block {
            return Err(FsError::Corrupted(format!(
                "{} blocks / {} inodes per group overflow a {}-bit bitmap",
                raw.blocks_per_group, raw.inodes_per_group, bits_per_block
            )));
        }

        debug!(
            "superblock: {} blocks ({} free), {} inodes ({} free), block size {}",
            raw.blocks_count,
            raw.free_blocks_count,
            raw.inodes_count,
            raw.free_inodes_count,
            BASE_BLOCK_SIZE << raw.log_block_size
        );
        Ok(Self { raw, image })
    }

    /// Write the whole record back to its fixed sectors.
    pub fn persist<D: BlockDevice>(&mut self, device: &D) -> Result<()> {
        encode_into(&self.raw, &mut self.image[..RawSuperBlock::SIZE])?;
        device.write(Self::SECTOR, SUPER_BLOCK_SIZE as u32, &self.image)?;
        Ok(())
    }

    /// Adjust the free inode/block totals and persist.
    /// The cached values are left unchanged if the write fails.
    pub fn update<D: BlockDevice>(
        &mut self,
        device: &D,
        delta_inodes: i32,
        delta_blocks: i32,
    ) -> Result<()> {
        let free_inodes = apply_delta(self.raw.free_inodes_count, delta_inodes, "free inodes")?;
        let free_blocks = apply_delta(self.raw.free_blocks_count, delta_blocks, "free blocks")?;

        let old = (self.raw.free_inodes_count, self.raw.free_blocks_count);
        self.raw.free_inodes_count = free_inodes;
        self.raw.free_blocks_count = free_blocks;
        if let Err(e) = self.persist(device) {
            (self.raw.free_inodes_count, self.raw.free_blocks_count) = old;
            return Err(e);
        }
        Ok(())
    }

    /// Stamp mount time and count, then persist.
    pub fn record_mount<D: BlockDevice>(&mut self, device: &D) -> Result<()> {
        let now = current_timestamp();
        self.raw.mount_time = now;
        self.raw.write_time = now;
        self.raw.mount_count = self.raw.mount_count.wrapping_add(1);
        info!("mount #{} recorded", self.raw.mount_count);
        self.persist(device)
    }

    pub fn block_size(&self) -> u32 {
        BASE_BLOCK_SIZE << self.raw.log_block_size
    }

    pub fn sectors_per_block(&self) -> u32 {
        self.block_size() / SECTOR_SIZE as u32
    }

    pub fn group_count(&self) -> u32 {
        div_round_up(self.raw.blocks_count, self.raw.blocks_per_group)
    }

    /// Block holding the start of the group descriptor table.
    pub fn group_desc_block(&self) -> u32 {
        self.raw.first_data_block + 1
    }

    pub fn volume_name(&self) -> String {
        let end = self
            .raw
            .volume_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.raw.volume_name.len());
        String::from_utf8_lossy(&self.raw.volume_name[..end]).into_owned()
    }
}

pub(crate) fn apply_delta(value: u32, delta: i32, what: &str) -> Result<u32> {
    value.checked_add_signed(delta).ok_or_else(|| {
        FsError::Corrupted(format!("{} counter {} cannot change by {}", what, value, delta))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::RamDisk;

    fn sample() -> RawSuperBlock {
        RawSuperBlock {
            inodes_count: 2048,
            blocks_count: 8192,
            free_blocks_count: 8000,
            free_inodes_count: 2037,
            first_data_block: 1,
            blocks_per_group: 8192,
            frags_per_group: 8192,
            inodes_per_group: 2048,
            signature: EXT2_SIGNATURE,
            state: 1,
            rev_level: 1,
            first_ino: 11,
            inode_size: 128,
            ..Default::default()
        }
    }

    #[test]
    fn test_encoded_size_matches_layout() {
        let bytes = bincode::serialize(&sample()).unwrap();
        assert_eq!(bytes.len(), RawSuperBlock::SIZE);
        // signature sits at byte 56 of the record
        assert_eq!(&bytes[56..58], &[0x53, 0xEF]);
    }

    #[test]
    fn test_parse_rejects_bad_signature() {
        let disk = RamDisk::new(64);
        let mut raw = sample();
        raw.signature = 0x1234;
        SuperBlock::new(raw).persist(&disk).unwrap();

        match SuperBlock::parse(&disk) {
            Err(FsError::InvalidSuperblock(sig)) => assert_eq!(sig, 0x1234),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_blank_disk_fails() {
        let disk = RamDisk::new(64);
        assert!(matches!(
            SuperBlock::parse(&disk),
            Err(FsError::InvalidSuperblock(0))
        ));
    }

    #[test]
    fn test_update_persists_counters() {
        let disk = RamDisk::new(64);
        let mut sb = SuperBlock::new(sample());
        sb.persist(&disk).unwrap();

        sb.update(&disk, -1, 3).unwrap();
        let reloaded = SuperBlock::parse(&disk).unwrap();
        assert_eq!(reloaded.raw.free_inodes_count, 2036);
        assert_eq!(reloaded.raw.free_blocks_count, 8003);
        assert_eq!(reloaded, sb);
    }

    #[test]
    fn test_update_refuses_underflow() {
        let disk = RamDisk::new(64);
        let mut raw = sample();
        raw.free_inodes_count = 0;
        let mut sb = SuperBlock::new(raw);
        assert!(matches!(
            sb.update(&disk, -1, 0),
            Err(FsError::Corrupted(_))
        ));
        assert_eq!(sb.raw.free_inodes_count, 0);
    }

    #[test]
    fn test_parse_rejects_groups_wider_than_a_bitmap() {
        let disk = RamDisk::new(64);
        for (blocks, inodes) in [(8192, 20000), (8193, 2048)] {
            let mut raw = sample();
            raw.blocks_per_group = blocks;
            raw.inodes_per_group = inodes;
            SuperBlock::new(raw).persist(&disk).unwrap();
            assert!(matches!(
                SuperBlock::parse(&disk),
                Err(FsError::Corrupted(_))
            ));
        }

        // a full 8192-bit group is still fine at 1 KiB blocks
        SuperBlock::new(sample()).persist(&disk).unwrap();
        SuperBlock::parse(&disk).unwrap();
    }

    #[test]
    fn test_tail_bytes_survive_persist() {
        let disk = RamDisk::new(64);
        let mut image = vec![0u8; SUPER_BLOCK_SIZE];
        bincode::serialize_into(&mut image[..RawSuperBlock::SIZE], &sample()).unwrap();
        image[200] = 0x5A;
        disk.write(SuperBlock::SECTOR, SUPER_BLOCK_SIZE as u32, &image)
            .unwrap();

        let mut sb = SuperBlock::parse(&disk).unwrap();
        sb.update(&disk, 0, -1).unwrap();

        let mut out = vec![0u8; SUPER_BLOCK_SIZE];
        disk.read(SuperBlock::SECTOR, SUPER_BLOCK_SIZE as u32, &mut out)
            .unwrap();
        assert_eq!(out[200], 0x5A);
    }
}
