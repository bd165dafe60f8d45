use clap::Parser;
use colored::*;
use env_logger::Env;

use mini_ext2::shell::{cli::Cli, start_shell};

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = start_shell(cli) {
        eprintln!("{} {}", "❌ Error:".red().bold(), e);
        std::process::exit(1);
    }
}
