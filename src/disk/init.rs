use std::sync::mpsc::Sender;

use log::{debug, info, warn};

use crate::{
    disk::FileDisk,
    fs::{format, FileSystem, Result},
    shell::{cli::Cli, BootProgress},
};

/// Open the disk image named on the command line, format it when it is new
/// or a format was requested, and hand the mounted volume back over `tx`.
///
/// The work runs to completion even if the boot screen has gone away, so a
/// requested format is never left half done.
pub fn perform_disk_initialization(tx: Sender<BootProgress>, cli: Cli) {
    let result = open_volume(&tx, &cli);
    if let Err(e) = &result {
        warn!("disk initialization failed: {}", e);
    }
    report(&tx, BootProgress::Finished(result));
}

fn report(tx: &Sender<BootProgress>, msg: BootProgress) {
    if tx.send(msg).is_err() {
        debug!("boot screen is gone; progress report dropped");
    }
}

fn open_volume(tx: &Sender<BootProgress>, cli: &Cli) -> Result<FileSystem<FileDisk>> {
    report(tx, BootProgress::Step("🧠 Initializing virtual disk..."));
    let opts = cli.format_options();
    let fresh = !cli.disk.exists();

    let (disk, grown) = FileDisk::open(&cli.disk, opts.disk_size())?;
    debug!("opened {} (grown: {})", cli.disk.display(), grown);
    report(tx, BootProgress::Progress(40));

    let mut fs = if fresh || cli.format {
        report(tx, BootProgress::Step("🔧 Formatting new file system..."));
        info!("formatting {}", cli.disk.display());
        format(disk, &opts)?
    } else {
        report(tx, BootProgress::Step("⚙️  Mounting file system..."));
        FileSystem::mount(disk)?
    };
    report(tx, BootProgress::Progress(90));

    fs.record_mount()?;
    report(tx, BootProgress::Progress(100));
    Ok(fs)
}
