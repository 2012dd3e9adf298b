use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pf_core::{ConversionMode, Setting, TargetFormat};

#[derive(Parser)]
#[command(name = "pixforge")]
#[command(author, version, about = "Image format conversion service backed by ImageMagick")]
pub struct Cli {
    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Convert a single local file
    Convert {
        /// Source image
        input: PathBuf,

        /// Target format: avif, webp, jpeg, png, gif or heif
        format: TargetFormat,

        /// lossless or lossy
        mode: ConversionMode,

        /// 0-100: quality (lossy) or compression effort (lossless)
        setting: Setting,

        /// Output path (defaults to the download name next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the engine command a conversion would run
    Plan {
        format: TargetFormat,
        mode: ConversionMode,
        setting: Setting,

        /// Source file name, used for the extension and frame handling
        #[arg(long, default_value = "image.jpg")]
        source: String,
    },

    /// Check that the engine and encoder plugin are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config or defaults if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
