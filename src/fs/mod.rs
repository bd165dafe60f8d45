//! ext2-compatible storage engine over a sector device.
use log::info;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    disk::BlockDevice,
    fs::{group_desc::GroupDescriptorTable, super_block::SuperBlock},
};

pub mod bitmap;
pub mod check;
pub mod config;
pub mod directory;
pub mod error;
pub mod file;
pub mod format;
pub mod group_desc;
pub mod inode_table;
pub mod super_block;

pub use bitmap::BitmapKind;
pub use check::CheckReport;
pub use config::{FormatOptions, ROOT_INODE};
pub use directory::{DirEntry, DirEntryType};
pub use error::{FsError, Result};
pub use format::format;
pub use inode_table::{FileType, Inode, Permissions};

/// A mounted volume: the device plus the cached superblock and descriptor
/// table. All filesystem operations go through this value; there is no shared
/// global state.
#[derive(Debug)]
pub struct FileSystem<D: BlockDevice> {
    device: D,
    pub super_block: SuperBlock,
    pub groups: GroupDescriptorTable,
}

/// Volume summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeStats {
    pub volume_name: String,
    pub block_size: u32,
    pub sectors_per_block: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub groups: u32,
    pub mount_count: u16,
}

impl VolumeStats {
    pub fn total_bytes(&self) -> u64 {
        self.total_blocks as u64 * self.block_size as u64
    }

    pub fn free_bytes(&self) -> u64 {
        self.free_blocks as u64 * self.block_size as u64
    }
}

impl<D: BlockDevice> FileSystem<D> {
    /// Parse the superblock and descriptor table of an existing volume.
    pub fn mount(device: D) -> Result<Self> {
        let super_block = SuperBlock::parse(&device)?;
        let groups = GroupDescriptorTable::parse(&device, &super_block)?;
        info!(
            "mounted ext2 volume: {} groups, block size {}",
            groups.len(),
            super_block.block_size()
        );
        Ok(Self {
            device,
            super_block,
            groups,
        })
    }

    pub(crate) fn from_parts(device: D, super_block: SuperBlock, groups: GroupDescriptorTable) -> Self {
        Self {
            device,
            super_block,
            groups,
        }
    }

    pub fn record_mount(&mut self) -> Result<()> {
        self.super_block.record_mount(&self.device)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn block_size(&self) -> u32 {
        self.super_block.block_size()
    }

    pub fn stats(&self) -> VolumeStats {
        let raw = &self.super_block.raw;
        VolumeStats {
            volume_name: self.super_block.volume_name(),
            block_size: self.block_size(),
            sectors_per_block: self.super_block.sectors_per_block(),
            total_blocks: raw.blocks_count,
            free_blocks: raw.free_blocks_count,
            total_inodes: raw.inodes_count,
            free_inodes: raw.free_inodes_count,
            blocks_per_group: raw.blocks_per_group,
            inodes_per_group: raw.inodes_per_group,
            groups: self.groups.len() as u32,
            mount_count: raw.mount_count,
        }
    }

    /// Read one block into a fresh buffer.
    pub(crate) fn read_block(&self, block: u32) -> Result<Vec<u8>> {
        self.check_block(block)?;
        let mut buf = vec![0u8; self.block_size() as usize];
        self.device.read(
            block * self.super_block.sectors_per_block(),
            self.block_size(),
            &mut buf,
        )?;
        Ok(buf)
    }

    pub(crate) fn write_block(&self, block: u32, buf: &[u8]) -> Result<()> {
        self.check_block(block)?;
        self.device.write(
            block * self.super_block.sectors_per_block(),
            self.block_size(),
            buf,
        )?;
        Ok(())
    }

    // block 0 doubles as the "unset" pointer value
    fn check_block(&self, block: u32) -> Result<()> {
        if block == 0 || block >= self.super_block.raw.blocks_count {
            return Err(FsError::InvalidBlock(block));
        }
        Ok(())
    }
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

pub(crate) fn encode_into<T: Serialize>(value: &T, out: &mut [u8]) -> Result<()> {
    bincode::serialize_into(out, value)?;
    Ok(())
}
