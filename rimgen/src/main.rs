// SPDX-License-Identifier: MIT
// rimgen/src/main.rs

mod commands;
mod utils;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::utils::{LogLevel, init_log_bridge, set_log_level};

#[derive(Parser)]
#[command(name = "rimgen", version, about = "Disk layout inspector", long_about = None)]
struct Cli {
    /// Resize requests applied to every image type, e.g. "ROOT-A:+100MiB STATE:=2GiB"
    #[arg(long, global = true, default_value = "")]
    adjust_part: String,

    /// Directory searched for parent layouts not found next to their child
    #[arg(long, global = true)]
    fallback_dir: Option<PathBuf>,

    /// Also print resolution details
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print results
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check image types against alignment, capacity and bad-block rules
    Validate {
        /// Layout path
        layout: PathBuf,
        /// Image types to check (all by default)
        image_types: Vec<String>,
    },
    /// Print the partition table of image types
    Debug {
        layout: PathBuf,
        image_types: Vec<String>,
    },
    /// List image types
    ImageTypes { layout: PathBuf },
    /// List partition numbers in layout order
    Partitions { layout: PathBuf, image_type: String },
    /// Print table totals
    Totals { layout: PathBuf, image_type: String },
    /// Print the smallest disk the image type fits on, in bytes
    DiskSize { layout: PathBuf, image_type: String },
    /// Print partition placement on a disk
    Extents {
        layout: PathBuf,
        image_type: String,
        /// Disk size, e.g. "16GiB"
        #[arg(long)]
        disk_size: String,
    },
    /// Print the device block size
    BlockSize {
        layout: PathBuf,
        /// Print the filesystem block size instead
        #[arg(long)]
        fs: bool,
    },
    /// Read one partition field
    Read {
        #[arg(value_enum)]
        field: Field,
        layout: PathBuf,
        image_type: String,
        /// Partition number (label for `number`)
        partition: String,
    },
    /// Convert a size like "4GiB" to bytes
    ParseSize { size: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Field {
    PartSize,
    FsSize,
    FullSize,
    Label,
    Number,
    Type,
    Format,
    FsFormat,
    FsOptions,
    Uuid,
    ReservedEraseBlocks,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    set_log_level(if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    });
    init_log_bridge();

    let ctx = commands::Context {
        adjust_part: cli.adjust_part,
        fallback_dir: cli.fallback_dir,
    };

    match cli.command {
        Commands::Validate {
            layout,
            image_types,
        } => commands::validate(&ctx, &layout, &image_types),
        Commands::Debug {
            layout,
            image_types,
        } => commands::debug(&ctx, &layout, &image_types),
        Commands::ImageTypes { layout } => commands::image_types(&ctx, &layout),
        Commands::Partitions { layout, image_type } => {
            commands::partitions(&ctx, &layout, &image_type)
        }
        Commands::Totals { layout, image_type } => commands::totals(&ctx, &layout, &image_type),
        Commands::DiskSize { layout, image_type } => {
            commands::disk_size(&ctx, &layout, &image_type)
        }
        Commands::Extents {
            layout,
            image_type,
            disk_size,
        } => commands::extents(&ctx, &layout, &image_type, &disk_size),
        Commands::BlockSize { layout, fs } => commands::block_size(&ctx, &layout, fs),
        Commands::Read {
            field,
            layout,
            image_type,
            partition,
        } => commands::read(&ctx, field, &layout, &image_type, &partition),
        Commands::ParseSize { size } => commands::parse_size(&size),
    }
}
