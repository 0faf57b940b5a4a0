//! `vorteil` — build and inspect Vorteil disk images (spec §6).

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use vorteil_image::sparse::OutputFormat;

#[derive(Parser)]
#[command(name = "vorteil", version, about = "Build and inspect Vorteil disk images")]
struct Cli {
    /// Increase log verbosity (-v, -vv); overridden by RUST_LOG if set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a disk image from a source tree, kernel files, and a config file.
    Build {
        /// Directory whose contents become the ROOT file system.
        #[arg(long)]
        source: PathBuf,
        /// Directory of kernel files to pack into the bundle.
        #[arg(long)]
        kernel_dir: PathBuf,
        /// App configuration JSON file.
        #[arg(long)]
        config: PathBuf,
        /// RNG seed for GUID generation.
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Total image size in bytes; defaults to the computed minimum.
        #[arg(long)]
        size: Option<u64>,
        /// Output image format.
        #[arg(long, value_enum, default_value_t = OutputFormatArg::Raw)]
        format: OutputFormatArg,
        /// Output image path.
        #[arg(long)]
        output: PathBuf,
    },
    /// Report whether an image is raw or VMDK sparse.
    ImageFormat { image: PathBuf },
    /// Print the GPT entries found in an image.
    Gpt { image: PathBuf },
    /// Print the ROOT file system's superblock summary.
    Fs { image: PathBuf },
    /// List a directory's entries.
    Ls { image: PathBuf, path: String },
    /// Print a file's contents to stdout.
    Cat { image: PathBuf, path: String },
    /// Copy a file out of the image onto the host file system.
    Cp { image: PathBuf, path: String, dest: PathBuf },
    /// Print a file's MD5 checksum.
    Md5 { image: PathBuf, path: String },
    /// Print a path's inode metadata.
    Stat { image: PathBuf, path: String },
    /// Recursively list a directory tree.
    Tree { image: PathBuf, path: String },
    /// Report total bytes used under a path.
    Du { image: PathBuf, path: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormatArg {
    Raw,
    Vmdk,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(value: OutputFormatArg) -> Self {
        match value {
            OutputFormatArg::Raw => OutputFormat::Raw,
            OutputFormatArg::Vmdk => OutputFormat::VmdkSparse,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    vorteil_core::logging::init_logging(cli.verbose > 0);

    let result = match cli.command {
        Commands::Build { source, kernel_dir, config, seed, size, format, output } => {
            commands::build::run(&source, &kernel_dir, &config, seed, size, format.into(), &output)
        }
        Commands::ImageFormat { image } => commands::inspect::image_format(&image),
        Commands::Gpt { image } => commands::inspect::gpt(&image),
        Commands::Fs { image } => commands::inspect::fs(&image),
        Commands::Ls { image, path } => commands::inspect::ls(&image, &path),
        Commands::Cat { image, path } => commands::inspect::cat(&image, &path),
        Commands::Cp { image, path, dest } => commands::inspect::cp(&image, &path, &dest),
        Commands::Md5 { image, path } => commands::inspect::md5(&image, &path),
        Commands::Stat { image, path } => commands::inspect::stat(&image, &path),
        Commands::Tree { image, path } => commands::inspect::tree(&image, &path),
        Commands::Du { image, path } => commands::inspect::du(&image, &path),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(exit_code_for(&err));
    }
    Ok(())
}

/// Maps a library error (if the anyhow chain's root cause is one) to the
/// numbered exit code taxonomy from spec §7; any other failure (bad CLI
/// arguments, host I/O during `build`'s tree walk) exits 1.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<vorteil_core::error::VorteilError>()
        .map(|e| e.exit_code())
        .unwrap_or(1)
}
