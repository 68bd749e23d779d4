//! SMX CLI - Command line interface
//!
//! Inspects plugin containers and rewrites them with or without the
//! compressed tail.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

mod report;

use report::InspectReport;
use smx_config::{LoadConfig, BEST_COMPRESSION};
use smx_core::format::compress;
use serde::Serialize;
use smx_core::{PluginImage, Result, SmxError};
use smx_log::{info, Level, LogConfig, Logger};

#[derive(Parser)]
#[command(
    name = "smx",
    about = "SMX plugin container tool",
    version = "0.1.0"
)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the header, section directory and symbol counts
    Inspect {
        file: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Rewrite a container with a zlib-compressed tail
    Compress {
        input: PathBuf,
        output: PathBuf,
        /// zlib level (0-9)
        #[arg(long, default_value_t = BEST_COMPRESSION, value_parser = clap::value_parser!(u32).range(0..=9))]
        level: u32,
    },
    /// Rewrite a container uncompressed
    Decompress { input: PathBuf, output: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    let (logger, _) = LogConfig::new(cli.log_level).with_stderr().init();

    if let Err(e) = run(cli.command, &logger) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(command: Command, logger: &Arc<Logger>) -> Result<()> {
    let config = LoadConfig::default();
    match command {
        Command::Inspect { file, json } => {
            let image = PluginImage::load_file(&file, &config, logger)?;
            let report = InspectReport::from_image(&image);
            if json {
                println!("{}", render_json(&report)?);
            } else {
                print!("{}", report.render_text());
            }
        }
        Command::Compress {
            input,
            output,
            level,
        } => {
            let container = smx_core::format::load_file(&input, &config, logger)?;
            let bytes = compress(&container.to_uncompressed_bytes(), level, logger)?;
            write_output(&output, &bytes, logger)?;
        }
        Command::Decompress { input, output } => {
            let container = smx_core::format::load_file(&input, &config, logger)?;
            write_output(&output, &container.to_uncompressed_bytes(), logger)?;
        }
    }
    Ok(())
}

fn render_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| SmxError::Param(format!("cannot serialize report: {}", e)))
}

fn write_output(path: &Path, bytes: &[u8], logger: &Arc<Logger>) -> Result<()> {
    std::fs::write(path, bytes)?;
    info!(logger, "wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}
