use std::path::PathBuf;

use clap::Parser;

use crate::fs::FormatOptions;

/// Interactive shell over an ext2-compatible disk image.
#[derive(Parser, Debug, Clone)]
#[command(name = "mini-ext2", version)]
pub struct Cli {
    /// Disk image file, created when missing
    #[arg(long, default_value = "disk.img")]
    pub disk: PathBuf,

    /// Image size in MiB for a new volume
    #[arg(long, default_value_t = 8)]
    pub size_mb: u64,

    /// Block size is 1024 << this (0..=2)
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=2))]
    pub block_size_log2: u32,

    #[arg(long, default_value_t = 2048)]
    pub inodes_per_group: u32,

    /// Format the image even if it already holds a volume
    #[arg(long)]
    pub format: bool,
}

impl Cli {
    pub fn format_options(&self) -> FormatOptions {
        FormatOptions::for_disk(
            self.size_mb << 20,
            self.block_size_log2,
            self.inodes_per_group,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["mini-ext2"]);
        assert_eq!(cli.disk, PathBuf::from("disk.img"));
        assert!(!cli.format);
        let opts = cli.format_options();
        assert_eq!(opts.blocks_count, 8192);
        assert_eq!(opts.inodes_per_group, 2048);
        opts.validate().unwrap();
    }

    #[test]
    fn test_rejects_large_block_size() {
        assert!(Cli::try_parse_from(["mini-ext2", "--block-size-log2", "3"]).is_err());
    }

    #[test]
    fn test_custom_geometry() {
        let cli = Cli::try_parse_from([
            "mini-ext2",
            "--disk",
            "/tmp/x.img",
            "--size-mb",
            "16",
            "--block-size-log2",
            "2",
            "--format",
        ])
        .unwrap();
        let opts = cli.format_options();
        assert_eq!(opts.block_size(), 4096);
        assert_eq!(opts.blocks_count, 4096);
        assert!(cli.format);
    }
}
