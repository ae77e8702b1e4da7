use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gst", version, about = "Live game text translation orchestrator")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan a process for a byte pattern ("48 89 ?? 24" form)
    Scan {
        #[arg(long)]
        pid: u32,
        /// Hex tokens separated by spaces; ?? is a wildcard
        pattern: String,
        /// Print hits as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rewrite every occurrence of the pairs' originals in place
    Inject {
        #[arg(long)]
        pid: u32,
        /// JSON file with [{"original": "...", "translated": "..."}] entries
        pairs_file: PathBuf,
        /// Write the injection report to this JSON file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List the target's loaded modules
    Modules {
        #[arg(long)]
        pid: u32,
        #[arg(long)]
        json: bool,
    },

    /// Hex dump target memory
    Read {
        #[arg(long)]
        pid: u32,
        /// Address, 0x-prefixed hex or decimal
        address: String,
        #[arg(long, default_value_t = 256)]
        size: usize,
    },

    /// Write raw bytes into the target
    Write {
        #[arg(long)]
        pid: u32,
        /// Address, 0x-prefixed hex or decimal
        address: String,
        /// Bytes as hex tokens, e.g. "49 6E 69 7A 69 61"
        bytes: String,
    },

    /// Load the translator module into the target
    Attach {
        #[arg(long)]
        pid: u32,
        /// Path to the translator DLL
        dll: PathBuf,
    },

    /// Serve translation requests on the named channel
    Serve {
        /// JSON file with [{"original": "...", "translated": "..."}] entries
        pairs_file: PathBuf,
        /// Serve the legacy JSON channel instead of the binary one
        #[arg(long)]
        legacy: bool,
    },
}
