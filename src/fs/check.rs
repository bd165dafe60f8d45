use std::fmt;

use log::{info, warn};

use crate::{
    disk::BlockDevice,
    fs::{bitmap::BitmapKind, error::Result, FileSystem},
};

/// Which counter a mismatch was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterScope {
    Group(u32),
    Volume,
}

/// A free counter that disagrees with its bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterMismatch {
    pub scope: CounterScope,
    pub kind: BitmapKind,
    pub recorded: u32,
    pub actual: u32,
}

impl fmt::Display for CounterMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            CounterScope::Group(g) => write!(f, "group {}: ", g)?,
            CounterScope::Volume => write!(f, "superblock: ")?,
        }
        write!(
            f,
            "free {}s recorded {}, bitmap says {}",
            self.kind, self.recorded, self.actual
        )
    }
}

/// Result of comparing every free counter against the bitmaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub groups: u32,
    /// Free totals recomputed from the bitmaps.
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub mismatches: Vec<CounterMismatch>,
}

impl CheckReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    fn compare(&mut self, scope: CounterScope, kind: BitmapKind, recorded: u32, actual: u32) {
        if recorded != actual {
            let mismatch = CounterMismatch {
                scope,
                kind,
                recorded,
                actual,
            };
            warn!("{}", mismatch);
            self.mismatches.push(mismatch);
        }
    }
}

impl<D: BlockDevice> FileSystem<D> {
    /// Recount every group's bitmaps and compare with the descriptor and
    /// superblock free counters. Nothing is repaired.
    pub fn check(&self) -> Result<CheckReport> {
        let mut report = CheckReport {
            groups: self.groups.len() as u32,
            ..Default::default()
        };

        for group in 0..report.groups {
            let desc = *self.groups.get(group)?;
            for (kind, recorded) in [
                (BitmapKind::Block, desc.free_blocks_count),
                (BitmapKind::Inode, desc.free_inodes_count),
            ] {
                let free = self.bits_in_group(group, kind) - self.count_used_bits(group, kind)?;
                match kind {
                    BitmapKind::Block => report.free_blocks += free,
                    BitmapKind::Inode => report.free_inodes += free,
                }
                report.compare(CounterScope::Group(group), kind, recorded as u32, free);
            }
        }

        let raw = &self.super_block.raw;
        let (free_blocks, free_inodes) = (report.free_blocks, report.free_inodes);
        report.compare(CounterScope::Volume, BitmapKind::Block, raw.free_blocks_count, free_blocks);
        report.compare(CounterScope::Volume, BitmapKind::Inode, raw.free_inodes_count, free_inodes);

        info!(
            "check finished: {} groups, {} mismatches",
            report.groups,
            report.mismatches.len()
        );
        Ok(report)
    }
}
