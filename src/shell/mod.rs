pub mod cli;
pub mod command;
pub mod parse;

use std::{
    error::Error,
    io::stdout,
    path::PathBuf,
    sync::mpsc,
    thread,
    time::Duration,
};

use colored::*;
use crossterm::{
    cursor, execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use reedline::{
    DefaultCompleter, DefaultPrompt, DefaultPromptSegment, FileBackedHistory, Reedline, Signal,
};

use crate::{
    disk::{init::perform_disk_initialization, BlockDevice, FileDisk, SECTOR_SIZE},
    fs::{self, format, format::check_layout, FileSystem, FormatOptions},
    shell::{
        cli::Cli,
        command::{execute_command, Flow, Session},
        parse::parse_command,
    },
};

/// Messages from the disk initialization thread to the boot screen.
pub enum BootProgress {
    Step(&'static str),
    Progress(u64),
    Finished(fs::Result<FileSystem<FileDisk>>),
}

const COMMANDS: [&str; 14] = [
    "help", "ls", "pwd", "mkdir", "create", "rm", "cd", "read", "write", "stat", "info", "fsck",
    "format", "exit",
];

pub fn start_shell(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut session = Session::new(boot(&cli)?);

    let username = whoami::username();
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());

    println!(
        "{}",
        "Type 'help' for available commands. Use ↑↓ for history, Tab for auto-completion.\n"
            .bright_black()
    );

    let history_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mini_ext2_history");
    let completer =
        DefaultCompleter::new_with_wordlen(COMMANDS.iter().map(|c| c.to_string()).collect(), 2);
    let mut line_editor = Reedline::create()
        .with_history(Box::new(FileBackedHistory::with_file(100, history_path)?))
        .with_completer(Box::new(completer));

    loop {
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic(format!(
                "{}:{}",
                format!("{}@{}", username, hostname).green(),
                session.cwd_path().blue()
            )),
            DefaultPromptSegment::Basic("mini-ext2".bright_blue().bold().to_string()),
        );

        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => {
                let trimmed = buffer.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let Some(cmd) = parse_command(trimmed) else {
                    println!(
                        "{}",
                        "⚠️  Unknown command or missing argument. Type 'help' for command list."
                            .yellow()
                    );
                    continue;
                };
                match execute_command(&cmd, &mut session) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Exit) => break,
                    Ok(Flow::Reformat) => match reformat_options(&session.fs, &cli) {
                        Ok(opts) => session = reformat(session, &opts)?,
                        Err(e) => println!("{} {}", "❌ Error:".red().bold(), e),
                    },
                    Err(e) => println!("{} {}", "❌ Error:".red().bold(), e),
                }
            }
            Ok(Signal::CtrlC) => {
                println!();
                continue;
            }
            Ok(Signal::CtrlD) => {
                println!("{}", "Exiting mini-ext2...".yellow());
                break;
            }
            #[allow(unreachable_patterns)]
            Ok(_) => continue,
            Err(e) => {
                warn!("line editor failed: {}", e);
                println!("Error reading line: {}", e);
                break;
            }
        }
    }

    println!("{}", "GoodBye!".bright_yellow());
    Ok(())
}

/// Boot screen: the disk is opened on a worker thread while a progress bar
/// follows its reports.
fn boot(cli: &Cli) -> Result<FileSystem<FileDisk>, Box<dyn Error>> {
    let mut out = stdout();
    execute!(out, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    println!("{}", "[mini-ext2 Booting...]".bright_yellow().bold());

    let (tx, rx) = mpsc::channel();
    let worker_cli = cli.clone();
    let worker = thread::spawn(move || perform_disk_initialization(tx, worker_cli));

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("=> "),
    );

    let mut finished = None;
    for msg in rx {
        match msg {
            BootProgress::Step(step) => pb.println(step),
            BootProgress::Progress(pos) => pb.set_position(pos),
            BootProgress::Finished(result) => {
                finished = Some(result);
                break;
            }
        }
    }
    if worker.join().is_err() {
        warn!("disk initialization thread panicked");
    }

    let fs = match finished {
        Some(Ok(fs)) => fs,
        Some(Err(e)) => {
            pb.abandon_with_message("❌ Boot failed");
            return Err(e.into());
        }
        None => {
            pb.abandon_with_message("❌ Boot failed");
            return Err("disk initialization ended without a result".into());
        }
    };
    pb.finish_with_message("✅ Ready!");
    thread::sleep(Duration::from_millis(300));

    execute!(
        out,
        Clear(ClearType::All),
        cursor::MoveTo(0, 0),
        SetForegroundColor(Color::Cyan),
        Print(format!(
            "Welcome to mini-ext2 v{} ({})\n",
            env!("CARGO_PKG_VERSION"),
            cli.disk.display()
        )),
        ResetColor
    )?;
    Ok(fs)
}

/// Geometry for re-formatting the mounted image at its current size.
/// Checked up front so a refusal leaves the mounted volume in place.
fn reformat_options<D: BlockDevice>(fs: &FileSystem<D>, cli: &Cli) -> fs::Result<FormatOptions> {
    let opts = FormatOptions::for_disk(
        fs.device().sector_count() as u64 * SECTOR_SIZE as u64,
        cli.block_size_log2,
        cli.inodes_per_group,
    );
    check_layout(&opts)?;
    Ok(opts)
}

/// Format the whole mounted image again.
fn reformat(
    session: Session<FileDisk>,
    opts: &FormatOptions,
) -> Result<Session<FileDisk>, Box<dyn Error>> {
    let device = session.fs.into_device();
    let spinner = ProgressBar::new_spinner();
    spinner.set_message("💾 Formatting virtual disk...");
    spinner.enable_steady_tick(Duration::from_millis(80));
    let mut fs = format(device, opts)?;
    fs.record_mount()?;
    spinner.finish_with_message("✅ Disk formatted successfully!");
    Ok(Session::new(fs))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::disk::RamDisk;

    fn mounted() -> FileSystem<RamDisk> {
        let opts = FormatOptions {
            blocks_count: 1024,
            blocks_per_group: 1024,
            inodes_per_group: 64,
            ..Default::default()
        };
        format(RamDisk::with_capacity(opts.disk_size()), &opts).unwrap()
    }

    #[test]
    fn test_reformat_options_follow_device_size() {
        let fs = mounted();
        let cli = Cli::parse_from(["mini-ext2", "--inodes-per-group", "128"]);
        let opts = reformat_options(&fs, &cli).unwrap();
        assert_eq!(opts.blocks_count, 1024);
        assert_eq!(opts.inodes_per_group, 128);
    }

    #[test]
    fn test_rejected_reformat_keeps_volume() {
        let mut fs = mounted();
        let cli = Cli::parse_from(["mini-ext2", "--inodes-per-group", "4"]);
        assert!(matches!(
            reformat_options(&fs, &cli),
            Err(fs::FsError::InvalidGeometry(_))
        ));
        let inode = fs.create(fs::ROOT_INODE, "still-here").unwrap();
        assert_eq!(fs.lookup(fs::ROOT_INODE, "still-here").unwrap(), Some(inode));
    }
}
