use log::{debug, info};

use crate::{
    disk::{BlockDevice, SECTOR_SIZE},
    fs::{
        bitmap::BitmapKind,
        config::{
            div_round_up, FormatOptions, EXT2_SIGNATURE, FIRST_INODE, GROUP_DESC_SIZE, INODE_SIZE,
            ROOT_INODE,
        },
        directory::dot_block,
        error::{FsError, Result},
        group_desc::{GroupDescriptorTable, RawGroupDescriptor},
        inode_table::{FileType, Inode, Permissions},
        super_block::{RawSuperBlock, SuperBlock},
        FileSystem,
    },
    utils::{current_timestamp, generate_uuid},
};

const STATE_CLEAN: u16 = 1;
const ERRORS_CONTINUE: u16 = 1;
const DEFAULT_MAX_MOUNT_COUNT: u16 = 20;
const INCOMPAT_FILETYPE: u32 = 0x2;

/// Where one group's metadata goes.
#[derive(Debug, Clone, Copy)]
struct GroupLayout {
    block_bitmap: u32,
    inode_bitmap: u32,
    inode_table: u32,
    /// Bits 0..used_bits of the block bitmap are taken by metadata.
    used_bits: u32,
    blocks: u32,
}

fn plan_groups(opts: &FormatOptions, first_data_block: u32) -> Result<Vec<GroupLayout>> {
    let block_size = opts.block_size();
    let groups = opts.group_count();
    let gdt_blocks = div_round_up(groups * GROUP_DESC_SIZE as u32, block_size);
    let table_blocks = div_round_up(opts.inodes_per_group * INODE_SIZE, block_size);

    (0..groups)
        .map(|g| {
            let start = g * opts.blocks_per_group;
            let blocks = opts.blocks_per_group.min(opts.blocks_count - start);
            // group 0 also carries the boot block, superblock and descriptor table
            let meta_start = if g == 0 {
                first_data_block + 1 + gdt_blocks
            } else {
                start
            };
            let used_bits = meta_start + 2 + table_blocks - start;
            let needed = used_bits + u32::from(g == 0);
            if needed > blocks {
                return Err(FsError::InvalidGeometry(format!(
                    "group {} has {} blocks but its metadata needs {}",
                    g, blocks, needed
                )));
            }
            Ok(GroupLayout {
                block_bitmap: meta_start,
                inode_bitmap: meta_start + 1,
                inode_table: meta_start + 2,
                used_bits,
                blocks,
            })
        })
        .collect()
}

/// Bitmap block with bits `0..used` set, and every bit from `limit` to the
/// end of the block set as padding.
fn bitmap_image(block_size: usize, used: u32, limit: u32) -> Vec<u8> {
    let mut buf = vec![0u8; block_size];
    for bit in (0..used).chain(limit..(block_size * 8) as u32) {
        buf[(bit / 8) as usize] |= 1 << (bit % 8);
    }
    buf
}

fn build_super_block(
    opts: &FormatOptions,
    first_data_block: u32,
    layouts: &[GroupLayout],
) -> SuperBlock {
    let now = current_timestamp();
    let mut volume_name = [0u8; 16];
    volume_name[..opts.volume_name.len()].copy_from_slice(opts.volume_name.as_bytes());

    SuperBlock::new(RawSuperBlock {
        inodes_count: layouts.len() as u32 * opts.inodes_per_group,
        blocks_count: opts.blocks_count,
        free_blocks_count: layouts.iter().map(|l| l.blocks - l.used_bits).sum(),
        free_inodes_count: layouts.len() as u32 * opts.inodes_per_group,
        first_data_block,
        log_block_size: opts.block_size_log2,
        log_frag_size: opts.block_size_log2,
        blocks_per_group: opts.blocks_per_group,
        frags_per_group: opts.blocks_per_group,
        inodes_per_group: opts.inodes_per_group,
        write_time: now,
        max_mount_count: DEFAULT_MAX_MOUNT_COUNT,
        signature: EXT2_SIGNATURE,
        state: STATE_CLEAN,
        errors: ERRORS_CONTINUE,
        last_check: now,
        rev_level: 1,
        first_ino: FIRST_INODE,
        inode_size: INODE_SIZE as u16,
        feature_incompat: INCOMPAT_FILETYPE,
        uuid: generate_uuid(),
        volume_name,
        ..Default::default()
    })
}

/// Reject options that `format` would refuse, without touching a device.
pub fn check_layout(opts: &FormatOptions) -> Result<()> {
    opts.validate()?;
    plan_groups(opts, first_data_block(opts)).map(|_| ())
}

fn first_data_block(opts: &FormatOptions) -> u32 {
    u32::from(opts.block_size() == 1024)
}

/// Write a fresh, empty volume onto `device` and return it mounted.
///
/// Inodes 1..=10 are reserved; inode 2 becomes the root directory holding
/// `.` and `..`.
pub fn format<D: BlockDevice>(device: D, opts: &FormatOptions) -> Result<FileSystem<D>> {
    opts.validate()?;
    let needed_sectors = opts.disk_size() / SECTOR_SIZE as u64;
    if (device.sector_count() as u64) < needed_sectors {
        return Err(FsError::InvalidGeometry(format!(
            "device has {} sectors, volume needs {}",
            device.sector_count(),
            needed_sectors
        )));
    }

    let block_size = opts.block_size() as usize;
    let first_data_block = first_data_block(opts);
    let layouts = plan_groups(opts, first_data_block)?;

    let mut super_block = build_super_block(opts, first_data_block, &layouts);
    super_block.persist(&device)?;
    let descriptors = layouts
        .iter()
        .map(|l| RawGroupDescriptor {
            block_bitmap: l.block_bitmap,
            inode_bitmap: l.inode_bitmap,
            inode_table: l.inode_table,
            free_blocks_count: (l.blocks - l.used_bits) as u16,
            free_inodes_count: opts.inodes_per_group as u16,
            ..Default::default()
        })
        .collect();
    let groups = GroupDescriptorTable::new(&super_block, descriptors);
    groups.persist(&device)?;

    let mut fs = FileSystem::from_parts(device, super_block, groups);
    let zero = vec![0u8; block_size];
    let table_blocks = div_round_up(opts.inodes_per_group * INODE_SIZE, opts.block_size());
    for (g, layout) in layouts.iter().enumerate() {
        fs.write_block(
            layout.block_bitmap,
            &bitmap_image(block_size, layout.used_bits, layout.blocks),
        )?;
        fs.write_block(
            layout.inode_bitmap,
            &bitmap_image(block_size, 0, opts.inodes_per_group),
        )?;
        for block in layout.inode_table..layout.inode_table + table_blocks {
            fs.write_block(block, &zero)?;
        }
        debug!("group {} laid out: {:?}", g, layout);
    }

    for index in 0..FIRST_INODE - 1 {
        fs.set_bit(0, index, BitmapKind::Inode, true)?;
    }
    make_root(&mut fs)?;

    info!(
        "formatted {} blocks of {} bytes in {} groups",
        opts.blocks_count,
        block_size,
        layouts.len()
    );
    Ok(fs)
}

fn make_root<D: BlockDevice>(fs: &mut FileSystem<D>) -> Result<()> {
    let block = fs.allocate_block(0)?;
    fs.write_block(block, &dot_block(fs.block_size() as usize, ROOT_INODE, ROOT_INODE)?)?;

    let mut root = Inode::new(
        FileType::Directory,
        Permissions::DIR_DEFAULT,
        current_timestamp(),
    );
    root.links_count = 2;
    root.size = fs.block_size();
    root.sectors_count = fs.super_block.sectors_per_block();
    root.block[0] = block;
    fs.write_inode(ROOT_INODE, &root)?;
    fs.groups.update_dirs(&fs.device, 0, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{disk::RamDisk, fs::DirEntryType};

    #[test]
    fn test_single_group_layout() {
        let opts = FormatOptions::default();
        let fs = format(RamDisk::with_capacity(opts.disk_size()), &opts).unwrap();

        let raw = &fs.super_block.raw;
        assert_eq!(raw.first_data_block, 1);
        assert_eq!(fs.super_block.group_desc_block(), 2);
        assert_eq!(raw.inodes_count, 2048);
        assert_eq!(raw.free_inodes_count, 2048 - 10);

        let desc = *fs.groups.get(0).unwrap();
        // boot, superblock, descriptor table, then bitmaps and 256 table blocks
        assert_eq!((desc.block_bitmap, desc.inode_bitmap, desc.inode_table), (3, 4, 5));
        assert_eq!(raw.free_blocks_count, 8192 - 261 - 1);
        assert_eq!(desc.free_blocks_count as u32, raw.free_blocks_count);
        assert_eq!(desc.dirs_count, 1);

        let root = fs.read_inode(ROOT_INODE).unwrap();
        assert_eq!(root.mode, 0x41ED);
        assert_eq!(root.block[0], 261);
        let entries = fs.list(ROOT_INODE).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|e| e.inode == ROOT_INODE && e.entry_type == DirEntryType::Directory));
    }

    #[test]
    fn test_multi_group_4k_layout() {
        let opts = FormatOptions {
            block_size_log2: 2,
            blocks_count: 5000,
            blocks_per_group: 2048,
            inodes_per_group: 256,
            ..Default::default()
        };
        let fs = format(RamDisk::with_capacity(opts.disk_size()), &opts).unwrap();
        assert_eq!(fs.groups.len(), 3);
        assert_eq!(fs.super_block.raw.first_data_block, 0);

        let g1 = *fs.groups.get(1).unwrap();
        assert_eq!((g1.block_bitmap, g1.inode_bitmap, g1.inode_table), (2048, 2049, 2050));
        // 256 inodes of 128 bytes fill 8 blocks
        assert_eq!(g1.free_blocks_count, 2048 - 10);
        // the short last group only has 904 blocks
        assert_eq!(fs.groups.get(2).unwrap().free_blocks_count, 904 - 10);
        assert_eq!(fs.bits_in_group(2, BitmapKind::Block), 904);
        assert!(fs.check().unwrap().is_consistent());
    }

    #[test]
    fn test_padding_bits_are_set() {
        let opts = FormatOptions {
            blocks_count: 1000,
            blocks_per_group: 1000,
            inodes_per_group: 64,
            ..Default::default()
        };
        let fs = format(RamDisk::with_capacity(opts.disk_size()), &opts).unwrap();
        let desc = *fs.groups.get(0).unwrap();
        let bits = fs.read_block(desc.block_bitmap).unwrap();
        assert_eq!(bits[1023], 0xFF);
        assert_eq!(bits[124], 0);
        assert_eq!(bits[125], 0xFF);
        let inodes = fs.read_block(desc.inode_bitmap).unwrap();
        assert_eq!(inodes[8], 0xFF);
    }

    #[test]
    fn test_rejects_small_device() {
        let opts = FormatOptions::default();
        let disk = RamDisk::with_capacity(opts.disk_size() / 2);
        assert!(matches!(
            format(disk, &opts),
            Err(FsError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_rejects_group_too_small_for_metadata() {
        let opts = FormatOptions {
            blocks_count: 8192 + 100,
            ..Default::default()
        };
        assert!(matches!(
            format(RamDisk::with_capacity(opts.disk_size()), &opts),
            Err(FsError::InvalidGeometry(_))
        ));
        assert!(matches!(
            check_layout(&opts),
            Err(FsError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_check_layout_matches_format() {
        check_layout(&FormatOptions::default()).unwrap();
        let too_few_inodes = FormatOptions {
            inodes_per_group: 4,
            ..Default::default()
        };
        assert!(matches!(
            check_layout(&too_few_inodes),
            Err(FsError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_mount_sees_what_format_wrote() {
        let opts = FormatOptions::default();
        let fs = format(RamDisk::with_capacity(opts.disk_size()), &opts).unwrap();
        let (sb, groups) = (fs.super_block.clone(), fs.groups.clone());

        let mounted = FileSystem::mount(fs.into_device()).unwrap();
        assert_eq!(mounted.super_block, sb);
        assert_eq!(mounted.groups, groups);
        assert_eq!(mounted.super_block.volume_name(), "mini-ext2");
    }
}
