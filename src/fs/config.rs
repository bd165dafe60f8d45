use crate::fs::error::{FsError, Result};

// The superblock always lives 1024 bytes into the volume and is 1024 bytes long,
// whatever the block size.
pub const SUPER_BLOCK_OFFSET: usize = 1024;
pub const SUPER_BLOCK_SIZE: usize = 1024;

pub const EXT2_SIGNATURE: u16 = 0xEF53;

/// Base block size; the superblock stores `log2(block_size / 1024)`.
pub const BASE_BLOCK_SIZE: u32 = 1024;
pub const MAX_BLOCK_SIZE_LOG2: u32 = 2; // 4 KiB

/// Fixed on-disk inode record size.
pub const INODE_SIZE: u32 = 128;

/// Size of one block group descriptor record.
pub const GROUP_DESC_SIZE: usize = 32;

/// Direct block pointers per inode. Indirect blocks are not supported.
pub const DIRECT_PTRS: usize = 12;

pub const ROOT_INODE: u32 = 2;

/// Inodes 1..FIRST_INODE are reserved and never handed out.
pub const FIRST_INODE: u32 = 11;

pub const MAX_NAME_LEN: usize = 255;

/// Geometry for a freshly formatted volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Block size = 1024 << block_size_log2
    pub block_size_log2: u32,
    pub blocks_count: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub volume_name: String,
}

impl Default for FormatOptions {
    fn default() -> Self {
        // 8 MiB, one group
        Self {
            block_size_log2: 0,
            blocks_count: 8192,
            blocks_per_group: 8192,
            inodes_per_group: 2048,
            volume_name: "mini-ext2".to_string(),
        }
    }
}

impl FormatOptions {
    pub fn block_size(&self) -> u32 {
        BASE_BLOCK_SIZE << self.block_size_log2
    }

    /// Geometry filling `disk_size` bytes with groups as large as one bitmap
    /// block allows. A trailing group too small for its own metadata is left
    /// out of the volume.
    pub fn for_disk(disk_size: u64, block_size_log2: u32, inodes_per_group: u32) -> Self {
        let mut opts = Self {
            block_size_log2,
            inodes_per_group,
            ..Default::default()
        };
        let block_size = opts.block_size();
        let blocks = (disk_size / block_size as u64).min(u32::MAX as u64) as u32;
        opts.blocks_count = blocks;
        opts.blocks_per_group = (block_size * 8).min(blocks.max(1));

        let tail = blocks % opts.blocks_per_group;
        let table_blocks = div_round_up(inodes_per_group.saturating_mul(INODE_SIZE), block_size);
        // bitmaps, inode table and at least one data block
        if tail != 0 && tail < table_blocks + 3 {
            opts.blocks_count -= tail;
        }
        opts
    }

    pub fn group_count(&self) -> u32 {
        div_round_up(self.blocks_count, self.blocks_per_group)
    }

    pub fn disk_size(&self) -> u64 {
        self.blocks_count as u64 * self.block_size() as u64
    }

    pub fn validate(&self) -> Result<()> {
        let bits_per_block = self.block_size() * 8;
        if self.block_size_log2 > MAX_BLOCK_SIZE_LOG2 {
            return Err(invalid(format!(
                "block size {} is larger than 4096",
                self.block_size()
            )));
        }
        if self.blocks_per_group == 0 || self.blocks_per_group > bits_per_block {
            return Err(invalid(format!(
                "blocks per group must be in 1..={}, got {}",
                bits_per_block, self.blocks_per_group
            )));
        }
        if self.inodes_per_group == 0 || self.inodes_per_group > bits_per_block {
            return Err(invalid(format!(
                "inodes per group must be in 1..={}, got {}",
                bits_per_block, self.inodes_per_group
            )));
        }
        if self.inodes_per_group < FIRST_INODE {
            return Err(invalid(format!(
                "inodes per group must cover the {} reserved inodes",
                FIRST_INODE - 1
            )));
        }
        if self.blocks_count == 0 {
            return Err(invalid("volume has no blocks".to_string()));
        }
        if self.volume_name.len() > 16 {
            return Err(invalid("volume name longer than 16 bytes".to_string()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> FsError {
    FsError::InvalidGeometry(msg)
}

pub fn div_round_up(n: u32, d: u32) -> u32 {
    (n + d - 1) / d
}

/// Directory records are padded to 4 bytes.
pub fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let opts = FormatOptions::default();
        opts.validate().unwrap();
        assert_eq!(opts.block_size(), 1024);
        assert_eq!(opts.group_count(), 1);
    }

    #[test]
    fn test_rejects_oversized_group() {
        let opts = FormatOptions {
            blocks_per_group: 8193,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(FsError::InvalidGeometry(_))));
    }

    #[test]
    fn test_group_count_rounds_up() {
        let opts = FormatOptions {
            blocks_count: 8193,
            ..Default::default()
        };
        assert_eq!(opts.group_count(), 2);
    }

    #[test]
    fn test_for_disk_keeps_usable_tail_group() {
        let opts = FormatOptions::for_disk(10 << 20, 0, 2048);
        assert_eq!(opts.blocks_per_group, 8192);
        assert_eq!(opts.blocks_count, 10240);
        assert_eq!(opts.group_count(), 2);
        opts.validate().unwrap();
    }

    #[test]
    fn test_for_disk_drops_tiny_tail_group() {
        let opts = FormatOptions::for_disk((8 << 20) + 100 * 1024, 0, 2048);
        assert_eq!(opts.blocks_count, 8192);
        assert_eq!(opts.group_count(), 1);
    }

    #[test]
    fn test_for_disk_small_volume_is_one_group() {
        let opts = FormatOptions::for_disk(2 << 20, 2, 128);
        assert_eq!(opts.block_size(), 4096);
        assert_eq!(opts.blocks_count, 512);
        assert_eq!(opts.blocks_per_group, 512);
    }

    #[test]
    fn test_align4() {
        assert_eq!(align4(8 + 1), 12);
        assert_eq!(align4(8 + 4), 12);
        assert_eq!(align4(8 + 9), 20);
    }
}
