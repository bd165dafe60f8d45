use std::fmt;

use log::{debug, error, warn};

use crate::{
    disk::BlockDevice,
    fs::{
        error::{FsError, Result},
        FileSystem,
    },
};

/// Which of a group's two bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitmapKind {
    Block,
    Inode,
}

impl fmt::Display for BitmapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Inode => write!(f, "inode"),
        }
    }
}

impl<D: BlockDevice> FileSystem<D> {
    /// Number of meaningful bits in a group's bitmap. The last block group may
    /// be shorter than `blocks_per_group`.
    pub fn bits_in_group(&self, group: u32, kind: BitmapKind) -> u32 {
        let raw = &self.super_block.raw;
        match kind {
            BitmapKind::Inode => raw.inodes_per_group,
            BitmapKind::Block => raw
                .blocks_per_group
                .min(raw.blocks_count.saturating_sub(group * raw.blocks_per_group)),
        }
    }

    fn bitmap_block(&self, group: u32, kind: BitmapKind) -> Result<u32> {
        let desc = self.groups.get(group)?;
        Ok(match kind {
            BitmapKind::Block => desc.block_bitmap,
            BitmapKind::Inode => desc.inode_bitmap,
        })
    }

    /// First clear bit in the group's bitmap, scanning from bit 0.
    pub fn find_free_bit(&self, group: u32, kind: BitmapKind) -> Result<u32> {
        let bits = self.bitmap_block(group, kind)?;
        let buf = self.read_block(bits)?;
        let limit = self.bits_in_group(group, kind);

        for (byte_index, byte) in buf.iter().enumerate() {
            if *byte == 0xFF {
                continue;
            }
            for bit in 0..8 {
                let index = (byte_index * 8 + bit) as u32;
                if index >= limit {
                    return Err(FsError::AllocationFailed(kind));
                }
                if *byte & (1 << bit) == 0 {
                    // block 0 is the null pointer, never hand it out
                    if kind == BitmapKind::Block && group == 0 && index == 0 {
                        continue;
                    }
                    return Ok(index);
                }
            }
        }
        Err(FsError::AllocationFailed(kind))
    }

    /// Set or clear one bitmap bit and move the matching group and superblock
    /// free counters the opposite way.
    ///
    /// The bitmap write, the descriptor update and the superblock update are
    /// one logical step: if a later write fails the earlier ones are undone
    /// (best effort) and the first error is returned.
    pub fn set_bit(&mut self, group: u32, index: u32, kind: BitmapKind, value: bool) -> Result<()> {
        if index >= self.bits_in_group(group, kind) {
            return Err(FsError::Corrupted(format!(
                "{} bit {} outside group {}",
                kind, index, group
            )));
        }
        let bits = self.bitmap_block(group, kind)?;
        let mut buf = self.read_block(bits)?;
        let (byte, mask) = ((index / 8) as usize, 1u8 << (index % 8));

        if (buf[byte] & mask != 0) == value {
            warn!(
                "{} bit {} of group {} already {}",
                kind,
                index,
                group,
                if value { "set" } else { "clear" }
            );
            return Ok(());
        }
        buf[byte] ^= mask;
        self.write_block(bits, &buf)?;

        let delta = if value { -1 } else { 1 };
        let (delta_inodes, delta_blocks) = match kind {
            BitmapKind::Inode => (delta, 0),
            BitmapKind::Block => (0, delta),
        };

        if let Err(e) = self
            .groups
            .update(&self.device, group, delta_inodes, delta_blocks)
        {
            self.undo_bit(bits, &mut buf, byte, mask);
            return Err(e);
        }
        if let Err(e) = self
            .super_block
            .update(&self.device, delta_inodes, delta_blocks)
        {
            if let Err(undo) =
                self.groups
                    .update(&self.device, group, -delta_inodes, -delta_blocks)
            {
                error!("group {} counters left inconsistent: {}", group, undo);
            }
            self.undo_bit(bits, &mut buf, byte, mask);
            return Err(e);
        }
        debug!(
            "{} {} bit {} in group {}",
            if value { "set" } else { "cleared" },
            kind,
            index,
            group
        );
        Ok(())
    }

    fn undo_bit(&self, bits: u32, buf: &mut [u8], byte: usize, mask: u8) {
        buf[byte] ^= mask;
        if let Err(e) = self.write_block(bits, buf) {
            error!("bitmap block {} left inconsistent: {}", bits, e);
        }
    }

    /// The first `count` bits of a group's bitmap, for inspection.
    pub fn bitmap_bits(&self, group: u32, kind: BitmapKind, count: u32) -> Result<Vec<bool>> {
        let buf = self.read_block(self.bitmap_block(group, kind)?)?;
        let count = count.min(self.bits_in_group(group, kind));
        Ok((0..count)
            .map(|i| buf[(i / 8) as usize] & (1 << (i % 8)) != 0)
            .collect())
    }

    /// Allocated bits among the meaningful ones of a group.
    pub fn count_used_bits(&self, group: u32, kind: BitmapKind) -> Result<u32> {
        let buf = self.read_block(self.bitmap_block(group, kind)?)?;
        let limit = self.bits_in_group(group, kind);
        let full_bytes = (limit / 8) as usize;
        let mut used: u32 = buf[..full_bytes].iter().map(|b| b.count_ones()).sum();
        if limit % 8 != 0 {
            let tail_mask = (1u8 << (limit % 8)) - 1;
            used += (buf[full_bytes] & tail_mask).count_ones();
        }
        Ok(used)
    }

    /// Pick a group with free resources and take its first free inode.
    pub fn allocate_inode(&mut self) -> Result<u32> {
        let group = self.groups.find_first_free_group()?;
        let index = self.find_free_bit(group, BitmapKind::Inode)?;
        self.set_bit(group, index, BitmapKind::Inode, true)?;
        Ok(group * self.super_block.raw.inodes_per_group + index + 1)
    }

    /// Take a free block, trying `preferred_group` before the others.
    pub fn allocate_block(&mut self, preferred_group: u32) -> Result<u32> {
        let groups = self.groups.len() as u32;
        let order = std::iter::once(preferred_group)
            .chain((0..groups).filter(|&g| g != preferred_group))
            .filter(|&g| g < groups);

        for group in order {
            if self.groups.get(group)?.free_blocks_count == 0 {
                continue;
            }
            match self.find_free_bit(group, BitmapKind::Block) {
                Ok(index) => {
                    self.set_bit(group, index, BitmapKind::Block, true)?;
                    return Ok(group * self.super_block.raw.blocks_per_group + index);
                }
                Err(FsError::AllocationFailed(_)) => {
                    warn!(
                        "group {} claims free blocks but its bitmap is full",
                        group
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(FsError::AllocationFailed(BitmapKind::Block))
    }

    pub fn free_block(&mut self, block: u32) -> Result<()> {
        if block == 0 || block >= self.super_block.raw.blocks_count {
            return Err(FsError::InvalidBlock(block));
        }
        let per_group = self.super_block.raw.blocks_per_group;
        self.set_bit(block / per_group, block % per_group, BitmapKind::Block, false)
    }

    pub fn free_inode(&mut self, inode: u32) -> Result<()> {
        let group = self.inode_group(inode)?;
        let index = (inode - 1) % self.super_block.raw.inodes_per_group;
        self.set_bit(group, index, BitmapKind::Inode, false)
    }
}
