use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    disk::{sectors_for, BlockDevice, SECTOR_SIZE},
    fs::{
        config::GROUP_DESC_SIZE,
        decode, encode_into,
        error::{FsError, Result},
        super_block::SuperBlock,
    },
};

/// One 32-byte block group descriptor.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawGroupDescriptor {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    /// First block of this group's inode table
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub dirs_count: u16,
    pub pad: u16,
    pub reserved: [u8; 12],
}

/// The whole descriptor table, one entry per group, loaded and written as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDescriptorTable {
    pub descriptors: Vec<RawGroupDescriptor>,
    start_sector: u32,
    sectors: u32,
}

impl GroupDescriptorTable {
    /// Table for a fresh volume; nothing is written until `persist`.
    pub fn new(sb: &SuperBlock, descriptors: Vec<RawGroupDescriptor>) -> Self {
        Self {
            start_sector: sb.group_desc_block() * sb.sectors_per_block(),
            sectors: sectors_for(descriptors.len() * GROUP_DESC_SIZE),
            descriptors,
        }
    }

    /// Load the table sized from the volume geometry.
    pub fn parse<D: BlockDevice>(device: &D, sb: &SuperBlock) -> Result<Self> {
        let count = sb.group_count() as usize;
        let start_sector = sb.group_desc_block() * sb.sectors_per_block();
        let sectors = sectors_for(count * GROUP_DESC_SIZE);

        let mut buf = vec![0u8; sectors as usize * SECTOR_SIZE];
        device.read(start_sector, buf.len() as u32, &mut buf)?;

        let descriptors = buf
            .chunks_exact(GROUP_DESC_SIZE)
            .take(count)
            .map(decode::<RawGroupDescriptor>)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "loaded {} group descriptors from sector {}",
            descriptors.len(),
            start_sector
        );
        Ok(Self {
            descriptors,
            start_sector,
            sectors,
        })
    }

    pub fn persist<D: BlockDevice>(&self, device: &D) -> Result<()> {
        let mut buf = vec![0u8; self.sectors as usize * SECTOR_SIZE];
        for (slot, desc) in buf.chunks_exact_mut(GROUP_DESC_SIZE).zip(&self.descriptors) {
            encode_into(desc, slot)?;
        }
        device.write(self.start_sector, buf.len() as u32, &buf)?;
        Ok(())
    }

    pub fn get(&self, group: u32) -> Result<&RawGroupDescriptor> {
        self.descriptors
            .get(group as usize)
            .ok_or_else(|| FsError::Corrupted(format!("block group {} does not exist", group)))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Adjust one group's free counts and persist the table.
    /// The cached entry is restored if the write fails.
    pub fn update<D: BlockDevice>(
        &mut self,
        device: &D,
        group: u32,
        delta_inodes: i32,
        delta_blocks: i32,
    ) -> Result<()> {
        let old = *self.get(group)?;
        let free_inodes = apply_delta16(old.free_inodes_count, delta_inodes, group)?;
        let free_blocks = apply_delta16(old.free_blocks_count, delta_blocks, group)?;

        let desc = &mut self.descriptors[group as usize];
        desc.free_inodes_count = free_inodes;
        desc.free_blocks_count = free_blocks;
        self.persist_or_restore(device, group, old)
    }

    /// Adjust one group's directory count and persist the table.
    pub fn update_dirs<D: BlockDevice>(&mut self, device: &D, group: u32, delta: i32) -> Result<()> {
        let old = *self.get(group)?;
        self.descriptors[group as usize].dirs_count = apply_delta16(old.dirs_count, delta, group)?;
        self.persist_or_restore(device, group, old)
    }

    /// First group with at least one free block and one free inode.
    pub fn find_first_free_group(&self) -> Result<u32> {
        self.descriptors
            .iter()
            .position(|d| d.free_blocks_count > 0 && d.free_inodes_count > 0)
            .map(|g| g as u32)
            .ok_or(FsError::NoSpace)
    }

    fn persist_or_restore<D: BlockDevice>(
        &mut self,
        device: &D,
        group: u32,
        old: RawGroupDescriptor,
    ) -> Result<()> {
        if let Err(e) = self.persist(device) {
            self.descriptors[group as usize] = old;
            return Err(e);
        }
        Ok(())
    }
}

fn apply_delta16(value: u16, delta: i32, group: u32) -> Result<u16> {
    i32::from(value)
        .checked_add(delta)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| {
            FsError::Corrupted(format!(
                "group {} counter {} cannot change by {}",
                group, value, delta
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disk::RamDisk,
        fs::{config::EXT2_SIGNATURE, super_block::RawSuperBlock},
    };

    fn superblock(blocks_count: u32, blocks_per_group: u32) -> SuperBlock {
        SuperBlock::new(RawSuperBlock {
            blocks_count,
            blocks_per_group,
            inodes_per_group: 64,
            first_data_block: 1,
            signature: EXT2_SIGNATURE,
            ..Default::default()
        })
    }

    fn desc(free_blocks: u16, free_inodes: u16) -> RawGroupDescriptor {
        RawGroupDescriptor {
            free_blocks_count: free_blocks,
            free_inodes_count: free_inodes,
            ..Default::default()
        }
    }

    #[test]
    fn test_descriptor_is_32_bytes() {
        assert_eq!(
            bincode::serialize(&RawGroupDescriptor::default()).unwrap().len(),
            GROUP_DESC_SIZE
        );
    }

    #[test]
    fn test_table_is_sized_from_geometry() {
        let disk = RamDisk::new(256);
        // 40 groups: past the old fixed 32-entry table and spanning 3 sectors
        let sb = superblock(40 * 100 - 50, 100);
        assert_eq!(sb.group_count(), 40);
        let descs = (0..40).map(|i| desc(i as u16, 1)).collect();
        GroupDescriptorTable::new(&sb, descs).persist(&disk).unwrap();

        let table = GroupDescriptorTable::parse(&disk, &sb).unwrap();
        assert_eq!(table.len(), 40);
        assert_eq!(table.get(39).unwrap().free_blocks_count, 39);
    }

    #[test]
    fn test_update_persists_one_entry() {
        let disk = RamDisk::new(64);
        let sb = superblock(300, 100);
        let mut table = GroupDescriptorTable::new(&sb, vec![desc(5, 5); 3]);
        table.persist(&disk).unwrap();

        table.update(&disk, 1, -1, 2).unwrap();
        let reloaded = GroupDescriptorTable::parse(&disk, &sb).unwrap();
        assert_eq!(reloaded, table);
        assert_eq!(reloaded.get(1).unwrap().free_inodes_count, 4);
        assert_eq!(reloaded.get(1).unwrap().free_blocks_count, 7);
        assert_eq!(reloaded.get(0).unwrap().free_blocks_count, 5);
    }

    #[test]
    fn test_find_first_free_group_needs_both_resources() {
        let sb = superblock(300, 100);
        let table = GroupDescriptorTable::new(&sb, vec![desc(0, 9), desc(9, 0), desc(1, 1)]);
        assert_eq!(table.find_first_free_group().unwrap(), 2);

        let full = GroupDescriptorTable::new(&sb, vec![desc(0, 9), desc(9, 0)]);
        assert!(matches!(full.find_first_free_group(), Err(FsError::NoSpace)));
    }

    #[test]
    fn test_update_rejects_negative_counts() {
        let disk = RamDisk::new(64);
        let sb = superblock(100, 100);
        let mut table = GroupDescriptorTable::new(&sb, vec![desc(0, 0)]);
        assert!(matches!(
            table.update(&disk, 0, 0, -1),
            Err(FsError::Corrupted(_))
        ));
    }
}
