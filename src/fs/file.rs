use std::io::Write;

use log::{debug, error, info};

use crate::{
    disk::BlockDevice,
    fs::{
        config::{DIRECT_PTRS, FIRST_INODE, ROOT_INODE},
        directory::{check_name, dot_block, DirEntry, DirEntryType},
        error::{FsError, Result},
        inode_table::{FileType, Inode, Permissions},
        FileSystem,
    },
    utils::current_timestamp,
};

impl<D: BlockDevice> FileSystem<D> {
    /// Create an empty regular file `name` in directory `parent` and return
    /// its inode number.
    pub fn create(&mut self, parent: u32, name: &str) -> Result<u32> {
        self.check_new_name(parent, name)?;
        let inode = self.allocate_inode()?;

        let record = Inode::new(
            FileType::RegularFile,
            Permissions::FILE_DEFAULT,
            current_timestamp(),
        );
        let linked = self.write_inode(inode, &record).and_then(|_| {
            self.insert_entry(parent, &DirEntry::new(inode, name, DirEntryType::File))
        });
        if let Err(e) = linked {
            self.release_inode(inode, &[]);
            return Err(e);
        }
        info!("created file {:?} as inode {} in dir {}", name, inode, parent);
        Ok(inode)
    }

    /// Create directory `name` in `parent` holding `.` and `..`.
    pub fn create_dir(&mut self, parent: u32, name: &str) -> Result<u32> {
        self.check_new_name(parent, name)?;
        let inode = self.allocate_inode()?;
        let group = self.inode_group(inode)?;
        let block = match self.allocate_block(group) {
            Ok(block) => block,
            Err(e) => {
                self.release_inode(inode, &[]);
                return Err(e);
            }
        };

        let mut record = Inode::new(
            FileType::Directory,
            Permissions::DIR_DEFAULT,
            current_timestamp(),
        );
        record.links_count = 2;
        record.size = self.block_size();
        record.sectors_count = self.super_block.sectors_per_block();
        record.block[0] = block;

        let linked = dot_block(self.block_size() as usize, inode, parent)
            .and_then(|buf| self.write_block(block, &buf))
            .and_then(|_| self.write_inode(inode, &record))
            .and_then(|_| {
                self.insert_entry(parent, &DirEntry::new(inode, name, DirEntryType::Directory))
            });
        if let Err(e) = linked {
            self.release_inode(inode, &[block]);
            return Err(e);
        }

        // `..` in the new directory links back to the parent
        let mut parent_record = self.read_inode(parent)?;
        parent_record.links_count += 1;
        self.write_inode(parent, &parent_record)?;
        self.groups.update_dirs(&self.device, group, 1)?;

        info!("created dir {:?} as inode {} in dir {}", name, inode, parent);
        Ok(inode)
    }

    fn check_new_name(&self, parent: u32, name: &str) -> Result<()> {
        check_name(name)?;
        if self.lookup(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    // Undo a half-finished create. Failures here only get logged: the
    // caller already has an error to report.
    fn release_inode(&mut self, inode: u32, blocks: &[u32]) {
        for &block in blocks {
            if let Err(e) = self.free_block(block) {
                error!("leaked block {}: {}", block, e);
            }
        }
        if let Err(e) = self.delete(inode) {
            error!("leaked inode {}: {}", inode, e);
        }
    }

    /// Replace the contents of a regular file with `data`.
    ///
    /// Always writes from offset 0. Existing block pointers are reused, new
    /// blocks come from the inode's own group first, and blocks beyond the
    /// new end are released.
    pub fn write(&mut self, inode: u32, data: &[u8]) -> Result<()> {
        let mut record = self.read_file_inode(inode)?;
        let block_size = self.block_size() as usize;
        let max = DIRECT_PTRS * block_size;
        if data.len() > max {
            return Err(FsError::FileTooLarge {
                len: data.len(),
                max,
            });
        }

        let blocks_needed = data.len().div_ceil(block_size);
        let group = self.inode_group(inode)?;
        if let Err(e) = self.fill_blocks(&mut record, data, group) {
            // blocks taken so far stay owned by the file
            self.write_inode(inode, &record)?;
            return Err(e);
        }

        let surplus: Vec<u32> = record.block[blocks_needed..]
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .collect();
        record.block[blocks_needed..].fill(0);
        record.size = data.len() as u32;
        record.sectors_count = blocks_needed as u32 * self.super_block.sectors_per_block();
        record.mtime = current_timestamp();
        self.write_inode(inode, &record)?;

        for block in surplus {
            self.free_block(block)?;
        }
        debug!("wrote {} bytes ({} blocks) to inode {}", data.len(), blocks_needed, inode);
        Ok(())
    }

    fn fill_blocks(&mut self, record: &mut Inode, data: &[u8], group: u32) -> Result<()> {
        let block_size = self.block_size() as usize;
        for (idx, chunk) in data.chunks(block_size).enumerate() {
            if record.block[idx] == 0 {
                record.block[idx] = self.allocate_block(group)?;
            }
            let mut buf = vec![0u8; block_size];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.write_block(record.block[idx], &buf)?;
        }
        Ok(())
    }

    /// Copy up to `buf.len()` bytes of the file into `buf`; returns the count.
    pub fn read(&self, inode: u32, buf: &mut [u8]) -> Result<usize> {
        let record = self.read_file_inode(inode)?;
        let wanted = (record.size as usize).min(buf.len());

        let mut done = 0;
        for block in record.data_blocks() {
            if done >= wanted {
                break;
            }
            let data = self.read_block(block)?;
            let n = (wanted - done).min(data.len());
            buf[done..done + n].copy_from_slice(&data[..n]);
            done += n;
        }
        Ok(done)
    }

    /// Whole file contents.
    pub fn read_to_vec(&self, inode: u32) -> Result<Vec<u8>> {
        let size = self.read_file_inode(inode)?.size as usize;
        let mut buf = vec![0u8; size];
        let n = self.read(inode, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Stream the file to `out` block by block.
    pub fn print<W: Write>(&self, inode: u32, out: &mut W) -> Result<()> {
        let record = self.read_file_inode(inode)?;
        let mut left = record.size as usize;
        for block in record.data_blocks() {
            if left == 0 {
                break;
            }
            let data = self.read_block(block)?;
            let n = left.min(data.len());
            out.write_all(&data[..n])?;
            left -= n;
        }
        out.flush()?;
        Ok(())
    }

    /// Release inode `inode` and zero its record.
    ///
    /// Its data blocks and any directory record naming it are left alone;
    /// `remove` does the full job.
    pub fn delete(&mut self, inode: u32) -> Result<()> {
        if inode < FIRST_INODE {
            return Err(FsError::InvalidInode(inode));
        }
        self.free_inode(inode)?;
        self.write_inode(inode, &Inode::default())?;
        debug!("deleted inode {}", inode);
        Ok(())
    }

    /// Unlink `name` from `parent`, free its blocks and delete its inode.
    /// Directories must be empty.
    pub fn remove(&mut self, parent: u32, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidName(name.to_string()));
        }
        let target = self
            .lookup(parent, name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        if target == ROOT_INODE {
            return Err(FsError::InvalidInode(target));
        }

        let record = self.read_inode(target)?;
        if record.is_dir()
            && self
                .list(target)?
                .iter()
                .any(|e| e.name != "." && e.name != "..")
        {
            return Err(FsError::DirectoryNotEmpty(name.to_string()));
        }

        self.remove_entry(parent, name)?;
        for block in record.data_blocks() {
            self.free_block(block)?;
        }
        if record.is_dir() {
            let mut parent_record = self.read_inode(parent)?;
            parent_record.links_count = parent_record.links_count.saturating_sub(1);
            self.write_inode(parent, &parent_record)?;
            let group = self.inode_group(target)?;
            self.groups.update_dirs(&self.device, group, -1)?;
        }
        self.delete(target)?;
        info!("removed {:?} (inode {}) from dir {}", name, target, parent);
        Ok(())
    }
}
