use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    disk::BlockDevice,
    fs::{
        config::{DIRECT_PTRS, INODE_SIZE},
        decode, encode_into,
        error::{FsError, Result},
        FileSystem,
    },
};

/// File type stored in the top 4 bits of `Inode::mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Fifo,
    CharDevice,
    Directory,
    BlockDevice,
    RegularFile,
    Symlink,
    Socket,
}

impl FileType {
    pub fn from_mode(mode: u16) -> Option<Self> {
        match (mode >> 12) & 0xF {
            0x1 => Some(Self::Fifo),
            0x2 => Some(Self::CharDevice),
            0x4 => Some(Self::Directory),
            0x6 => Some(Self::BlockDevice),
            0x8 => Some(Self::RegularFile),
            0xA => Some(Self::Symlink),
            0xC => Some(Self::Socket),
            _ => None,
        }
    }

    /// The type tag already shifted into place.
    pub fn mode_bits(self) -> u16 {
        let tag: u16 = match self {
            Self::Fifo => 0x1,
            Self::CharDevice => 0x2,
            Self::Directory => 0x4,
            Self::BlockDevice => 0x6,
            Self::RegularFile => 0x8,
            Self::Symlink => 0xA,
            Self::Socket => 0xC,
        };
        tag << 12
    }
}

bitflags! {
    /// Permission bits in the low 12 bits of `Inode::mode`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u16 {
        const OTH_X = 0o001;
        const OTH_W = 0o002;
        const OTH_R = 0o004;
        const GRP_X = 0o010;
        const GRP_W = 0o020;
        const GRP_R = 0o040;
        const USR_X = 0o100;
        const USR_W = 0o200;
        const USR_R = 0o400;
        const STICKY = 0o1000;
        const SETGID = 0o2000;
        const SETUID = 0o4000;

        /// rw-r--r--
        const FILE_DEFAULT = Self::USR_R.bits() | Self::USR_W.bits() | Self::GRP_R.bits() | Self::OTH_R.bits();
        /// rwxr-xr-x
        const DIR_DEFAULT = Self::FILE_DEFAULT.bits() | Self::USR_X.bits() | Self::GRP_X.bits() | Self::OTH_X.bits();
    }
}

/// The 128-byte on-disk inode record.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inode {
    pub mode: u16,
    pub uid: u16,
    /// File size in bytes (low 32 bits)
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    /// Number of 512-byte sectors in use
    pub sectors_count: u32,
    pub flags: u32,
    pub os_specific1: u32,
    pub block: [u32; DIRECT_PTRS],
    // Indirect pointers are carried but never followed.
    pub singly_indirect: u32,
    pub doubly_indirect: u32,
    pub triply_indirect: u32,
    pub generation: u32,
    pub file_acl: u32,
    pub dir_acl: u32,
    pub fragment_addr: u32,
    pub os_specific2: [u8; 12],
}

impl Inode {
    pub fn new(file_type: FileType, permissions: Permissions, now: u32) -> Self {
        Self {
            mode: file_type.mode_bits() | permissions.bits(),
            links_count: 1,
            atime: now,
            ctime: now,
            mtime: now,
            ..Default::default()
        }
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits_truncate(self.mode & 0x0FFF)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == Some(FileType::RegularFile)
    }

    /// Direct block pointers in use, in order, up to the first unset one.
    pub fn data_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.block.iter().copied().take_while(|&b| b != 0)
    }

    /// `rwxr-xr-x` style rendering of the permission bits.
    pub fn permission_string(&self) -> String {
        let p = self.permissions();
        [
            (Permissions::USR_R, 'r'),
            (Permissions::USR_W, 'w'),
            (Permissions::USR_X, 'x'),
            (Permissions::GRP_R, 'r'),
            (Permissions::GRP_W, 'w'),
            (Permissions::GRP_X, 'x'),
            (Permissions::OTH_R, 'r'),
            (Permissions::OTH_W, 'w'),
            (Permissions::OTH_X, 'x'),
        ]
        .iter()
        .map(|&(flag, c)| if p.contains(flag) { c } else { '-' })
        .collect()
    }
}

/// Where an inode record lives on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeLocation {
    pub group: u32,
    pub index_in_group: u32,
    pub block: u32,
    pub offset: usize,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Block group owning inode `inode`.
    pub fn inode_group(&self, inode: u32) -> Result<u32> {
        if inode == 0 || inode > self.super_block.raw.inodes_count {
            return Err(FsError::InvalidInode(inode));
        }
        Ok((inode - 1) / self.super_block.raw.inodes_per_group)
    }

    /// Translate an inode number to its table block and byte offset.
    ///
    /// The slot inside the group is `inode % inodes_per_group`, which keeps
    /// images written by earlier builds of this kernel readable.
    pub fn inode_location(&self, inode: u32) -> Result<InodeLocation> {
        let group = self.inode_group(inode)?;
        let index_in_group = inode % self.super_block.raw.inodes_per_group;
        let per_block = self.block_size() / INODE_SIZE;
        let table = self.groups.get(group)?.inode_table;
        Ok(InodeLocation {
            group,
            index_in_group,
            block: table + index_in_group / per_block,
            offset: ((index_in_group % per_block) * INODE_SIZE) as usize,
        })
    }

    pub fn read_inode(&self, inode: u32) -> Result<Inode> {
        let loc = self.inode_location(inode)?;
        let buf = self.read_block(loc.block)?;
        decode(&buf[loc.offset..loc.offset + INODE_SIZE as usize])
    }

    /// Read-modify-write of the block holding the record.
    pub fn write_inode(&self, inode: u32, record: &Inode) -> Result<()> {
        let loc = self.inode_location(inode)?;
        let mut buf = self.read_block(loc.block)?;
        encode_into(record, &mut buf[loc.offset..loc.offset + INODE_SIZE as usize])?;
        self.write_block(loc.block, &buf)
    }

    /// Read an inode and require it to be a directory.
    pub(crate) fn read_dir_inode(&self, inode: u32) -> Result<Inode> {
        let record = self.read_inode(inode)?;
        if !record.is_dir() {
            return Err(FsError::NotADirectory(inode));
        }
        Ok(record)
    }

    /// Read an inode and require it to be a regular file.
    pub(crate) fn read_file_inode(&self, inode: u32) -> Result<Inode> {
        let record = self.read_inode(inode)?;
        if !record.is_file() {
            return Err(FsError::NotAFile(inode));
        }
        Ok(record)
    }
}
