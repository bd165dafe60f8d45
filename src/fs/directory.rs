use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    disk::BlockDevice,
    fs::{
        config::{align4, DIRECT_PTRS, MAX_NAME_LEN},
        decode, encode_into,
        error::{FsError, Result},
        inode_table::FileType,
        FileSystem,
    },
    utils::current_timestamp,
};

/// Fixed 8-byte header in front of every directory record's name.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
struct RawDirEntryHeader {
    inode: u32,
    rec_len: u16,
    name_len: u8,
    file_type: u8,
}

const HEADER_LEN: usize = 8;

/// Type tag stored in a directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirEntryType {
    Unknown,
    File,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Symlink,
}

impl DirEntryType {
    pub fn from_raw(tag: u8) -> Self {
        match tag {
            1 => Self::File,
            2 => Self::Directory,
            3 => Self::CharDevice,
            4 => Self::BlockDevice,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::File => 1,
            Self::Directory => 2,
            Self::CharDevice => 3,
            Self::BlockDevice => 4,
            Self::Fifo => 5,
            Self::Socket => 6,
            Self::Symlink => 7,
        }
    }
}

impl From<FileType> for DirEntryType {
    fn from(file_type: FileType) -> Self {
        match file_type {
            FileType::RegularFile => Self::File,
            FileType::Directory => Self::Directory,
            FileType::CharDevice => Self::CharDevice,
            FileType::BlockDevice => Self::BlockDevice,
            FileType::Fifo => Self::Fifo,
            FileType::Socket => Self::Socket,
            FileType::Symlink => Self::Symlink,
        }
    }
}

/// A decoded directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u32,
    pub entry_type: DirEntryType,
    pub name: String,
}

impl DirEntry {
    pub fn new(inode: u32, name: &str, entry_type: DirEntryType) -> Self {
        Self {
            inode,
            entry_type,
            name: name.to_string(),
        }
    }

    /// Smallest record that can hold this entry.
    pub fn footprint(&self) -> usize {
        record_len(self.name.len())
    }

    fn validate(&self) -> Result<()> {
        check_name(&self.name)?;
        if self.inode == 0 {
            return Err(FsError::InvalidInode(0));
        }
        Ok(())
    }
}

/// Names are 1..=255 bytes without `/` or NUL.
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('/') || name.contains('\0') {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Header plus name, padded to 4 bytes.
pub fn record_len(name_len: usize) -> usize {
    align4(HEADER_LEN + name_len)
}

/// Position reached while walking one directory block.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Live {
        offset: usize,
        header: RawDirEntryHeader,
    },
    /// inode == 0 or rec_len == 0: nothing live follows in this block.
    End { offset: usize },
}

/// Walks the records of one directory block by record length.
struct Records<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Records<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            done: false,
        }
    }
}

impl Iterator for Records<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        if self.done || self.offset + HEADER_LEN > self.buf.len() {
            return None;
        }
        let offset = self.offset;
        let header: RawDirEntryHeader = match decode(&self.buf[offset..offset + HEADER_LEN]) {
            Ok(h) => h,
            Err(_) => {
                self.done = true;
                return None;
            }
        };
        if header.inode == 0 || header.rec_len == 0 {
            self.done = true;
            return Some(Slot::End { offset });
        }

        let rec_len = header.rec_len as usize;
        let end = offset + rec_len;
        if rec_len < HEADER_LEN || end > self.buf.len() || offset + HEADER_LEN + header.name_len as usize > end {
            warn!("bad directory record length {} at offset {}, stopping", rec_len, offset);
            self.done = true;
            return None;
        }
        self.offset = end;
        Some(Slot::Live { offset, header })
    }
}

fn write_record(buf: &mut [u8], offset: usize, entry: &DirEntry, rec_len: usize) -> Result<()> {
    let header = RawDirEntryHeader {
        inode: entry.inode,
        rec_len: rec_len as u16,
        name_len: entry.name.len() as u8,
        file_type: entry.entry_type.raw(),
    };
    encode_into(&header, &mut buf[offset..offset + HEADER_LEN])?;
    let name = entry.name.as_bytes();
    buf[offset + HEADER_LEN..offset + HEADER_LEN + name.len()].copy_from_slice(name);
    Ok(())
}

fn set_rec_len(buf: &mut [u8], offset: usize, rec_len: usize) -> Result<()> {
    let mut header: RawDirEntryHeader = decode(&buf[offset..offset + HEADER_LEN])?;
    header.rec_len = rec_len as u16;
    encode_into(&header, &mut buf[offset..offset + HEADER_LEN])
}

fn entry_at(buf: &[u8], offset: usize, header: &RawDirEntryHeader) -> DirEntry {
    let start = offset + HEADER_LEN;
    let name = &buf[start..start + header.name_len as usize];
    DirEntry {
        inode: header.inode,
        entry_type: DirEntryType::from_raw(header.file_type),
        name: String::from_utf8_lossy(name).into_owned(),
    }
}

/// A fresh directory block holding `.` and `..`, the latter spanning the rest.
pub(crate) fn dot_block(block_size: usize, this: u32, parent: u32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; block_size];
    let dot = DirEntry::new(this, ".", DirEntryType::Directory);
    let dot_dot = DirEntry::new(parent, "..", DirEntryType::Directory);
    write_record(&mut buf, 0, &dot, dot.footprint())?;
    write_record(&mut buf, dot.footprint(), &dot_dot, block_size - dot.footprint())?;
    Ok(buf)
}

impl<D: BlockDevice> FileSystem<D> {
    /// Add `entry` to directory `parent`.
    ///
    /// Each existing block is walked in order: the entry goes at the block's
    /// end marker when it fits there, or into the slack of a live record
    /// whose length exceeds its footprint. Otherwise a new block is added
    /// while direct pointers remain.
    pub fn insert_entry(&mut self, parent: u32, entry: &DirEntry) -> Result<()> {
        entry.validate()?;
        let mut dir = self.read_dir_inode(parent)?;
        if self.lookup(parent, &entry.name)?.is_some() {
            return Err(FsError::AlreadyExists(entry.name.clone()));
        }

        let block_size = self.block_size() as usize;
        let needed = entry.footprint();

        for idx in 0..DIRECT_PTRS {
            let block = dir.block[idx];
            if block == 0 {
                return self.append_dir_block(parent, &mut dir, idx, entry);
            }

            let mut buf = self.read_block(block)?;
            let slots: Vec<Slot> = Records::new(&buf).collect();
            for slot in slots {
                match slot {
                    Slot::End { offset } => {
                        if offset + needed <= block_size {
                            write_record(&mut buf, offset, entry, needed)?;
                            self.write_block(block, &buf)?;

                            let end = (idx * block_size + offset + needed) as u32;
                            if end > dir.size {
                                dir.size = end;
                            }
                            dir.mtime = current_timestamp();
                            self.write_inode(parent, &dir)?;
                            debug!("appended {:?} to dir {} block {}", entry.name, parent, block);
                            return Ok(());
                        }
                        break;
                    }
                    Slot::Live { offset, header } => {
                        let used = record_len(header.name_len as usize);
                        let rec_len = header.rec_len as usize;
                        if rec_len >= used + needed {
                            set_rec_len(&mut buf, offset, used)?;
                            write_record(&mut buf, offset + used, entry, rec_len - used)?;
                            self.write_block(block, &buf)?;
                            debug!("split record at {} in dir {} block {}", offset, parent, block);
                            return Ok(());
                        }
                    }
                }
            }
        }
        Err(FsError::DirectoryFull(parent))
    }

    fn append_dir_block(
        &mut self,
        parent: u32,
        dir: &mut crate::fs::Inode,
        idx: usize,
        entry: &DirEntry,
    ) -> Result<()> {
        let block_size = self.block_size() as usize;
        let block = self.allocate_block(self.inode_group(parent)?)?;

        let mut buf = vec![0u8; block_size];
        write_record(&mut buf, 0, entry, block_size)?;
        self.write_block(block, &buf)?;

        dir.block[idx] = block;
        dir.size += block_size as u32;
        dir.sectors_count += self.super_block.sectors_per_block();
        dir.mtime = current_timestamp();
        self.write_inode(parent, dir)?;
        debug!("dir {} grew to block #{} ({})", parent, idx, block);
        Ok(())
    }

    /// Entries of directory `dir`, block by block in on-disk order.
    pub fn list(&self, dir: u32) -> Result<Vec<DirEntry>> {
        let inode = self.read_dir_inode(dir)?;
        let mut entries = Vec::new();
        for block in inode.data_blocks() {
            let buf = self.read_block(block)?;
            entries.extend(Records::new(&buf).filter_map(|slot| match slot {
                Slot::Live { offset, header } => Some(entry_at(&buf, offset, &header)),
                Slot::End { .. } => None,
            }));
        }
        Ok(entries)
    }

    /// Inode number of `name` in directory `dir`.
    pub fn lookup(&self, dir: u32, name: &str) -> Result<Option<u32>> {
        Ok(self
            .list(dir)?
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.inode))
    }

    /// Drop the record named `name` from `parent` and return it.
    ///
    /// The freed space is merged into the previous record; a record at the
    /// start of a block is replaced by its successor instead.
    pub fn remove_entry(&mut self, parent: u32, name: &str) -> Result<DirEntry> {
        let dir = self.read_dir_inode(parent)?;
        for block in dir.data_blocks() {
            let mut buf = self.read_block(block)?;
            let live: Vec<(usize, RawDirEntryHeader)> = Records::new(&buf)
                .filter_map(|slot| match slot {
                    Slot::Live { offset, header } => Some((offset, header)),
                    Slot::End { .. } => None,
                })
                .collect();

            let Some(pos) = live
                .iter()
                .position(|(offset, header)| entry_at(&buf, *offset, header).name == name)
            else {
                continue;
            };
            let (offset, header) = live[pos];
            let removed = entry_at(&buf, offset, &header);

            if pos > 0 {
                let (prev_offset, prev) = live[pos - 1];
                set_rec_len(&mut buf, prev_offset, prev.rec_len as usize + header.rec_len as usize)?;
            } else if let Some(&(next_offset, next)) = live.get(1) {
                let successor = entry_at(&buf, next_offset, &next);
                let span = header.rec_len as usize + next.rec_len as usize;
                buf[offset..offset + span].fill(0);
                write_record(&mut buf, offset, &successor, span)?;
            } else {
                // only record in the block: leave an end marker behind
                buf[offset..offset + header.rec_len as usize].fill(0);
            }
            self.write_block(block, &buf)?;
            debug!("removed {:?} from dir {}", name, parent);
            return Ok(removed);
        }
        Err(FsError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disk::RamDisk,
        fs::{config::FormatOptions, format, ROOT_INODE},
    };

    fn small_fs() -> FileSystem<RamDisk> {
        let opts = FormatOptions {
            blocks_count: 1024,
            blocks_per_group: 1024,
            inodes_per_group: 256,
            ..Default::default()
        };
        format(RamDisk::with_capacity(opts.disk_size()), &opts).unwrap()
    }

    #[test]
    fn test_fresh_root_lists_dot_entries() {
        let fs = small_fs();
        let names: Vec<String> = fs.list(ROOT_INODE).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn test_insert_splits_spanning_record() {
        let mut fs = small_fs();
        let entry = DirEntry::new(20, "a.txt", DirEntryType::File);
        fs.insert_entry(ROOT_INODE, &entry).unwrap();

        let root = fs.read_inode(ROOT_INODE).unwrap();
        let buf = fs.read_block(root.block[0]).unwrap();
        let slots: Vec<Slot> = Records::new(&buf).collect();
        // ".", ".." shrunk to 12, new record takes the rest of the block
        match slots[1] {
            Slot::Live { offset, header } => assert_eq!((offset, header.rec_len), (12, 12)),
            _ => panic!("expected live record"),
        }
        match slots[2] {
            Slot::Live { offset, header } => {
                assert_eq!((offset, header.rec_len as usize), (24, 1024 - 24))
            }
            _ => panic!("expected live record"),
        }
        assert_eq!(fs.list(ROOT_INODE).unwrap()[2], entry);
        assert_eq!(root.size, 1024);
    }

    #[test]
    fn test_insert_appends_at_end_marker() {
        let mut fs = small_fs();
        let mut root = fs.read_inode(ROOT_INODE).unwrap();
        // hand-made block: one 12-byte record followed by zeros
        let block = fs.allocate_block(0).unwrap();
        let mut buf = vec![0u8; 1024];
        write_record(&mut buf, 0, &DirEntry::new(30, "x", DirEntryType::File), 12).unwrap();
        fs.write_block(block, &buf).unwrap();
        root.block[0] = block;
        root.size = 12;
        fs.write_inode(ROOT_INODE, &root).unwrap();

        fs.insert_entry(ROOT_INODE, &DirEntry::new(31, "yy", DirEntryType::File))
            .unwrap();
        let root = fs.read_inode(ROOT_INODE).unwrap();
        assert_eq!(root.size, 24);
        let names: Vec<String> = fs.list(ROOT_INODE).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["x", "yy"]);
    }

    #[test]
    fn test_insert_rejects_non_directory() {
        let mut fs = small_fs();
        let file = fs.create(ROOT_INODE, "f").unwrap();
        let err = fs
            .insert_entry(file, &DirEntry::new(40, "g", DirEntryType::File))
            .unwrap_err();
        assert!(matches!(err, FsError::NotADirectory(n) if n == file));
        assert!(matches!(fs.list(file), Err(FsError::NotADirectory(_))));
    }

    #[test]
    fn test_insert_rejects_bad_names() {
        let mut fs = small_fs();
        let long = "n".repeat(256);
        for name in ["", "a/b", long.as_str()] {
            let err = fs
                .insert_entry(ROOT_INODE, &DirEntry::new(40, name, DirEntryType::File))
                .unwrap_err();
            assert!(matches!(err, FsError::InvalidName(_)));
        }
        let err = fs
            .insert_entry(ROOT_INODE, &DirEntry::new(40, "..", DirEntryType::File))
            .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
    }

    #[test]
    fn test_directory_full_after_twelve_blocks() {
        let mut fs = small_fs();
        // 255-byte names need 264-byte records: 3 per 1 KiB block
        let mut inserted = 0;
        let err = loop {
            let name = format!("{:0>255}", inserted);
            match fs.insert_entry(ROOT_INODE, &DirEntry::new(40, &name, DirEntryType::File)) {
                Ok(()) => inserted += 1,
                Err(e) => break e,
            }
        };
        assert!(matches!(err, FsError::DirectoryFull(ROOT_INODE)));

        let root = fs.read_inode(ROOT_INODE).unwrap();
        assert!(root.block.iter().all(|&b| b != 0));
        assert_eq!(root.size, 12 * 1024);
        assert_eq!(fs.list(ROOT_INODE).unwrap().len(), inserted + 2);
    }

    #[test]
    fn test_remove_entry_keeps_the_rest_listed() {
        let mut fs = small_fs();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            fs.insert_entry(ROOT_INODE, &DirEntry::new(20 + i as u32, name, DirEntryType::File))
                .unwrap();
        }
        let removed = fs.remove_entry(ROOT_INODE, "b").unwrap();
        assert_eq!(removed.inode, 21);
        // the first record of the block goes too
        fs.remove_entry(ROOT_INODE, ".").unwrap();

        let names: Vec<String> = fs.list(ROOT_INODE).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["..", "a", "c"]);
        assert!(matches!(
            fs.remove_entry(ROOT_INODE, "b"),
            Err(FsError::NotFound(_))
        ));

        // freed space is reusable
        fs.insert_entry(ROOT_INODE, &DirEntry::new(50, "d", DirEntryType::File))
            .unwrap();
        assert_eq!(fs.lookup(ROOT_INODE, "d").unwrap(), Some(50));
    }
}
