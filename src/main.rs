//! revpk - build, patch and extract VPK packed-store archives
//!
//! Usage:
//!   revpk pack <locale> <context> <level> [workspace] [build_path]  - Build an archive
//!   revpk unpack <file> [out]                                       - Extract an archive
//!   revpk patch <dir_file> <workspace> [build_path]                 - Patch an archive
//!   revpk list <file> [filter]                                      - List entries
//!   revpk info <file>                                               - Show archive information

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use revpk::ops::{list_entries, pack_archive, patch_archive, show_info, unpack_archive};
use revpk::CompressionLevel;

#[derive(Parser)]
#[command(name = "revpk")]
#[command(version = "0.1.0")]
#[command(about = "Build, patch and extract VPK packed-store archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    Fastest,
    Faster,
    Default,
    Better,
    Uber,
}

impl From<Level> for CompressionLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Fastest => CompressionLevel::Fastest,
            Level::Faster => CompressionLevel::Faster,
            Level::Default => CompressionLevel::Default,
            Level::Better => CompressionLevel::Better,
            Level::Uber => CompressionLevel::Uber,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a workspace into a new archive
    Pack {
        /// Archive locale (e.g. english)
        locale: String,
        /// Archive context (server or client)
        context: String,
        /// Level name (e.g. mp_rr_box)
        level_name: String,
        /// Workspace to pack
        #[arg(default_value = ".")]
        workspace: PathBuf,
        /// Output directory for the archive files
        #[arg(default_value = "build")]
        build_path: PathBuf,
        /// Worker threads (0 = hardware concurrency)
        #[arg(short, long, default_value = "0")]
        threads: usize,
        /// Compression level
        #[arg(short, long, value_enum, default_value = "default")]
        level: Level,
    },
    /// Extract an archive
    Unpack {
        /// Directory file (or any pack-block file of the archive)
        file: PathBuf,
        /// Output directory
        #[arg(default_value = ".")]
        out: PathBuf,
        /// Worker threads (0 = hardware concurrency)
        #[arg(short, long, default_value = "0")]
        threads: usize,
        /// Derive pack-block names from the on-disk directory file name
        /// instead of the embedded archive name (for renamed archives)
        #[arg(short, long)]
        sanitize: bool,
    },
    /// Layer a patch workspace over an existing archive
    Patch {
        /// Base archive directory file
        dir_file: PathBuf,
        /// Workspace with the patch files
        workspace: PathBuf,
        /// Output directory for the patched archive
        #[arg(default_value = "build")]
        build_path: PathBuf,
        /// Worker threads (0 = hardware concurrency)
        #[arg(short, long, default_value = "0")]
        threads: usize,
        /// Compression level
        #[arg(short, long, value_enum, default_value = "default")]
        level: Level,
    },
    /// List entries in an archive
    List {
        /// Directory file (or any pack-block file of the archive)
        file: PathBuf,
        /// Filter pattern (e.g. *.txt, scripts/*)
        filter: Option<String>,
    },
    /// Show archive information
    Info {
        /// Directory file (or any pack-block file of the archive)
        file: PathBuf,
    },
}

fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Pack {
            locale,
            context,
            level_name,
            workspace,
            build_path,
            threads,
            level,
        } => {
            pack_archive(
                &locale,
                &context,
                &level_name,
                &workspace,
                &build_path,
                threads,
                level.into(),
            )?;
            Ok(true)
        }
        Commands::Unpack {
            file,
            out,
            threads,
            sanitize,
        } => unpack_archive(&file, &out, threads, sanitize),
        Commands::Patch {
            dir_file,
            workspace,
            build_path,
            threads,
            level,
        } => {
            patch_archive(&dir_file, &workspace, &build_path, threads, level.into())?;
            Ok(true)
        }
        Commands::List { file, filter } => {
            list_entries(&file, filter.as_deref())?;
            Ok(true)
        }
        Commands::Info { file } => {
            show_info(&file)?;
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        // Some entries failed verification but the rest were extracted.
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
