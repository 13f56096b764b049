//! CLI for quartzip — accelerator-offload DEFLATE with gzip-framed output.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quartzip")]
#[command(about = "quartzip — stream DEFLATE through a hardware accelerator, gzip-framed")]
#[command(version = quartzip_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into framed gzip chunks (default output: FILE.qz)
    Compress {
        /// Input file
        file: PathBuf,

        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compression level, 1-9 (9 always runs in software)
        #[arg(short, long, default_value_t = 1)]
        level: u32,

        /// Hardware block size in KiB (power of two)
        #[arg(long)]
        block_kib: Option<u32>,
    },

    /// Decompress a framed (or standard gzip) file
    Decompress {
        /// Input file
        file: PathBuf,

        /// Output path (default: input without its .qz suffix)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show pool state and the effective session defaults
    Info {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compress {
            file,
            output,
            level,
            block_kib,
        } => commands::compress(&file, output, level, block_kib),
        Commands::Decompress { file, output } => commands::decompress(&file, output),
        Commands::Info { json } => commands::info(json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("quartzip: {e}");
            ExitCode::FAILURE
        }
    }
}
