use std::{
    error::Error,
    io::{self, Write},
};

use colored::*;
use dialoguer::Confirm;

use crate::{
    disk::BlockDevice,
    fs::{self, BitmapKind, DirEntryType, FileSystem, FsError, ROOT_INODE},
    utils::{format_timestamp, format_uuid, human_size},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Ls,
    Pwd,
    Mkdir(String),
    Create(String),
    Rm(String),
    Cd(String),
    Read(String),
    Write(String, String),
    Stat(String),
    Info,
    Fsck,
    Format,
    Exit,
}

/// What the shell loop does once a command has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Reformat,
    Exit,
}

/// A mounted volume plus the shell's working directory.
pub struct Session<D: BlockDevice> {
    pub fs: FileSystem<D>,
    cwd: u32,
    path: Vec<String>,
}

impl<D: BlockDevice> Session<D> {
    pub fn new(fs: FileSystem<D>) -> Self {
        Self {
            fs,
            cwd: ROOT_INODE,
            path: Vec::new(),
        }
    }

    pub fn cwd(&self) -> u32 {
        self.cwd
    }

    pub fn cwd_path(&self) -> String {
        format!("/{}", self.path.join("/"))
    }

    /// Follow `target` one component at a time; absolute paths start at root.
    pub fn change_dir(&mut self, target: &str) -> fs::Result<()> {
        let (mut cwd, mut path) = if target.starts_with('/') {
            (ROOT_INODE, Vec::new())
        } else {
            (self.cwd, self.path.clone())
        };

        for part in target.split('/').filter(|p| !p.is_empty() && *p != ".") {
            let inode = self
                .fs
                .lookup(cwd, part)?
                .ok_or_else(|| FsError::NotFound(part.to_string()))?;
            if !self.fs.read_inode(inode)?.is_dir() {
                return Err(FsError::NotADirectory(inode));
            }
            if part == ".." {
                path.pop();
            } else {
                path.push(part.to_string());
            }
            cwd = inode;
        }
        self.cwd = cwd;
        self.path = path;
        Ok(())
    }

    fn resolve(&self, name: &str) -> fs::Result<u32> {
        self.fs
            .lookup(self.cwd, name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    fn display_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.cwd_path(), name)
        }
    }
}

pub fn execute_command<D: BlockDevice>(
    cmd: &Command,
    session: &mut Session<D>,
) -> Result<Flow, Box<dyn Error>> {
    match cmd {
        Command::Help => print_help(),
        Command::Ls => list(session)?,
        Command::Pwd => println!("📍 {}", session.cwd_path().cyan()),
        Command::Mkdir(name) => {
            let inode = session.fs.create_dir(session.cwd, name)?;
            println!(
                "✅ Created directory: {} (inode {})",
                session.display_path(name).green(),
                inode
            );
        }
        Command::Create(name) => {
            let inode = session.fs.create(session.cwd, name)?;
            println!(
                "📝 Created file: {} (inode {})",
                session.display_path(name).green(),
                inode
            );
        }
        Command::Rm(name) => {
            session.fs.remove(session.cwd, name)?;
            println!("🗑️  Removed: {}", session.display_path(name).red());
        }
        Command::Cd(path) => {
            session.change_dir(path)?;
            println!("📂 Moved to {}", session.cwd_path().blue());
        }
        Command::Read(name) => {
            let inode = session.resolve(name)?;
            let mut out = io::stdout().lock();
            session.fs.print(inode, &mut out)?;
            writeln!(out)?;
        }
        Command::Write(name, content) => {
            let inode = match session.fs.lookup(session.cwd, name)? {
                Some(inode) => inode,
                None => session.fs.create(session.cwd, name)?,
            };
            session.fs.write(inode, content.as_bytes())?;
            println!(
                "✏️  Wrote {} bytes to {}",
                content.len(),
                session.display_path(name).cyan()
            );
        }
        Command::Stat(name) => stat(session, name)?,
        Command::Info => info(session)?,
        Command::Fsck => fsck(session)?,
        Command::Format => {
            let confirmed = Confirm::new()
                .with_prompt("Erase every file on this disk?")
                .default(false)
                .interact()?;
            if confirmed {
                return Ok(Flow::Reformat);
            }
            println!("{}", "Format cancelled.".bright_black());
        }
        Command::Exit => {
            println!("{}", "👋 Exiting mini-ext2 shell...".yellow().bold());
            return Ok(Flow::Exit);
        }
    }

    Ok(Flow::Continue)
}

fn list<D: BlockDevice>(session: &Session<D>) -> Result<(), Box<dyn Error>> {
    for entry in session.fs.list(session.cwd)? {
        let icon = match entry.entry_type {
            DirEntryType::Directory => "📁",
            DirEntryType::File => "📄",
            _ => "❔",
        };
        let size = session.fs.read_inode(entry.inode)?.size;
        let name = if entry.entry_type == DirEntryType::Directory {
            entry.name.blue().bold()
        } else {
            entry.name.normal()
        };
        println!(
            "{}  {:<28} {:>6} {:>10}",
            icon,
            name,
            entry.inode.to_string().bright_black(),
            human_size(size as u64)
        );
    }
    Ok(())
}

fn stat<D: BlockDevice>(session: &Session<D>, name: &str) -> Result<(), Box<dyn Error>> {
    let number = session.resolve(name)?;
    let inode = session.fs.read_inode(number)?;
    let kind = match inode.file_type() {
        Some(t) => format!("{:?}", t),
        None => "Unknown".to_string(),
    };
    let blocks: Vec<String> = inode.data_blocks().map(|b| b.to_string()).collect();

    println!("{}", "📊 File Info".bright_yellow().bold());
    println!("{}: {}", "Name".blue(), name);
    println!("{}: {}", "Inode".blue(), number);
    println!("{}: {} ({})", "Type".blue(), kind, inode.permission_string());
    println!("{}: {} bytes", "Size".blue(), inode.size);
    println!("{}: {}", "Links".blue(), inode.links_count);
    println!("{}: {}", "Sectors".blue(), inode.sectors_count);
    println!("{}: [{}]", "Blocks".blue(), blocks.join(", "));
    println!("{}: {}", "Modified".blue(), format_timestamp(inode.mtime));
    println!("{}: {}", "Changed".blue(), format_timestamp(inode.ctime));
    Ok(())
}

fn info<D: BlockDevice>(session: &Session<D>) -> Result<(), Box<dyn Error>> {
    let stats = session.fs.stats();
    let raw = &session.fs.super_block.raw;

    println!("{}", "💽 Volume Info".bright_yellow().bold());
    println!("{}: {}", "Name".blue(), stats.volume_name);
    println!("{}: {}", "UUID".blue(), format_uuid(&raw.uuid));
    println!(
        "{}: {} bytes ({} sectors)",
        "Block size".blue(),
        stats.block_size,
        stats.sectors_per_block
    );
    println!(
        "{}: {} free of {} ({} free)",
        "Blocks".blue(),
        stats.free_blocks,
        stats.total_blocks,
        human_size(stats.free_bytes())
    );
    println!(
        "{}: {} free of {}",
        "Inodes".blue(),
        stats.free_inodes,
        stats.total_inodes
    );
    println!(
        "{}: {} ({} blocks, {} inodes each)",
        "Groups".blue(),
        stats.groups,
        stats.blocks_per_group,
        stats.inodes_per_group
    );
    println!(
        "{}: {} (last {})",
        "Mounts".blue(),
        stats.mount_count,
        format_timestamp(raw.mount_time)
    );

    for kind in [BitmapKind::Block, BitmapKind::Inode] {
        let bits: String = session
            .fs
            .bitmap_bits(0, kind, 64)?
            .iter()
            .map(|&used| if used { '1' } else { '0' })
            .collect();
        println!("{}: {}", format!("Group 0 {} bitmap", kind).blue(), bits.bright_black());
    }
    Ok(())
}

fn fsck<D: BlockDevice>(session: &Session<D>) -> Result<(), Box<dyn Error>> {
    let report = session.fs.check()?;
    if report.is_consistent() {
        println!(
            "{} {} groups, {} free blocks, {} free inodes",
            "✅ Clean:".green().bold(),
            report.groups,
            report.free_blocks,
            report.free_inodes
        );
    } else {
        println!("{}", "⚠️  Counter mismatches found:".yellow().bold());
        for mismatch in &report.mismatches {
            println!("   {}", mismatch.to_string().red());
        }
    }
    Ok(())
}

fn print_help() {
    println!("{}", "📘 mini-ext2 Commands".bright_cyan().bold());
    println!(
        "{}",
        "
  ls                 List the current directory
  pwd                Print current path
  mkdir <dir>        Create directory
  create <file>      Create empty file
  rm <name>          Remove a file or an empty directory
  cd <path>          Change directory (/, .. and a/b accepted)
  read <file>        Print file content
  write <file> <str> Replace file content (creates the file)
  stat <name>        Show inode details
  info               Show volume summary
  fsck               Check free counters against the bitmaps
  format             Erase and re-format the disk
  help               Show this help message
  exit               Quit the shell
"
        .bright_black()
    );
}
