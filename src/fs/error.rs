use thiserror::Error;

use crate::fs::bitmap::BitmapKind;

/// Filesystem error type.
///
/// Every failure is returned to the immediate caller; nothing here halts the
/// kernel and nothing is retried automatically.
#[derive(Debug, Error)]
pub enum FsError {
    /// Underlying sector I/O failed.
    #[error("device I/O error: {0}")]
    DeviceIo(#[from] std::io::Error),

    #[error("invalid superblock: signature {0:#06x}, expected 0xef53")]
    InvalidSuperblock(u16),

    #[error("inode {0} is not a directory")]
    NotADirectory(u32),

    #[error("inode {0} is not a regular file")]
    NotAFile(u32),

    /// All direct pointers of the directory are in use and none has room.
    #[error("directory inode {0} is full")]
    DirectoryFull(u32),

    /// Data would need more than the direct blocks; indirect blocks are not supported.
    #[error("file of {len} bytes exceeds the {max} byte direct-block limit")]
    FileTooLarge { len: usize, max: usize },

    #[error("no free {0} found")]
    AllocationFailed(BitmapKind),

    /// No group has both a free block and a free inode.
    #[error("no block group with free space")]
    NoSpace,

    #[error("invalid inode number {0}")]
    InvalidInode(u32),

    #[error("invalid block number {0}")]
    InvalidBlock(u32),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("directory is not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("file system corrupted: {0}")]
    Corrupted(String),
}

impl From<bincode::Error> for FsError {
    fn from(e: bincode::Error) -> Self {
        FsError::Corrupted(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
