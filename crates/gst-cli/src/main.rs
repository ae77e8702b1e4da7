mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Args, Command};

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gst=info,gst_core=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match args.command {
        Command::Scan { pid, pattern, json } => commands::scan::run(pid, &pattern, json),
        Command::Inject {
            pid,
            pairs_file,
            report,
        } => commands::inject::run(pid, &pairs_file, report.as_deref()),
        Command::Modules { pid, json } => commands::modules::run(pid, json),
        Command::Read { pid, address, size } => commands::read::run(pid, &address, size),
        Command::Write {
            pid,
            address,
            bytes,
        } => commands::write::run(pid, &address, &bytes),
        Command::Attach { pid, dll } => commands::attach::run(pid, &dll),
        Command::Serve { pairs_file, legacy } => commands::serve::run(&pairs_file, legacy),
    }
}
