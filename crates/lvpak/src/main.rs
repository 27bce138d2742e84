//! `lvpak`: create, list, verify and unpack LVPA archives.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use lvpa_archive::{Algorithm, Level};
use tracing::Level as LogFilter;

#[derive(Parser)]
#[command(
    name = "lvpak",
    about = "Create, inspect, verify and unpack LVPA archives",
    version,
    author
)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LogFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Compression algorithms this build can write
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgoArg {
    /// Store without compression
    None,
    /// LZMA
    Lzma,
    /// Raw DEFLATE
    Deflate,
}

impl From<AlgoArg> for Algorithm {
    fn from(algo: AlgoArg) -> Self {
        match algo {
            AlgoArg::None => Self::None,
            AlgoArg::Lzma => Self::Lzma,
            AlgoArg::Deflate => Self::Deflate,
        }
    }
}

/// Master key source shared by every subcommand
#[derive(Args, Debug, Default)]
pub struct KeyArgs {
    /// Passphrase; the master key is its SHA-256 digest
    #[arg(short, long, env = "LVPAK_KEY", hide_env_values = true)]
    pub key: Option<String>,
}

impl KeyArgs {
    /// Master key bytes, if a passphrase was given
    pub fn master_key(&self) -> Option<Vec<u8>> {
        self.key
            .as_deref()
            .map(|text| lvpa_crypto::hash256(text.as_bytes()).as_bytes().to_vec())
    }
}

/// Options for `create` and `add`
#[derive(Args, Debug)]
pub struct PackArgs {
    /// Archive file
    pub archive: PathBuf,

    /// Files or directories to pack
    pub inputs: Vec<PathBuf>,

    /// Store names relative to this directory
    #[arg(short, long)]
    pub prefix: Option<PathBuf>,

    /// Read additional input paths from a file, one per line
    #[arg(long)]
    pub listfile: Option<PathBuf>,

    /// Compression level of the files, 0 to 9
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
    pub level: Option<u8>,

    /// Compression algorithm of the files
    #[arg(long, value_enum)]
    pub algo: Option<AlgoArg>,

    /// Put every file into this solid block
    #[arg(long)]
    pub solid: Option<String>,

    /// Compression level of the header table and solid blocks, 0 to 9
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(0..=9))]
    pub header_level: u8,

    /// Compression algorithm of the header table and solid blocks
    #[arg(long, value_enum, default_value = "lzma")]
    pub header_algo: AlgoArg,

    /// Encrypt the files
    #[arg(long)]
    pub encrypt: bool,

    /// Encrypt the header table, and every file that does not opt out
    #[arg(long)]
    pub encrypt_headers: bool,

    /// Store a salted hash instead of each file name
    #[arg(long)]
    pub scramble: bool,

    #[command(flatten)]
    pub key: KeyArgs,
}

impl PackArgs {
    /// File level, `Inherit` when not given
    pub fn entry_level(&self) -> Level {
        self.level.map_or(Level::INHERIT, Level)
    }

    /// File algorithm, `Inherit` when not given
    pub fn entry_algorithm(&self) -> Algorithm {
        self.algo.map_or(Algorithm::Inherit, Algorithm::from)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the entries of an archive
    List {
        /// Archive file
        archive: PathBuf,

        /// Resolve scrambled names from this file, one name per line
        #[arg(long)]
        listfile: Option<PathBuf>,

        #[command(flatten)]
        key: KeyArgs,
    },

    /// Create a new archive, replacing any existing file
    Create(PackArgs),

    /// Add files to an existing archive, creating it when missing
    Add(PackArgs),

    /// Read every entry and check its checksums
    Test {
        /// Archive file
        archive: PathBuf,

        /// Resolve scrambled names from this file, one name per line
        #[arg(long)]
        listfile: Option<PathBuf>,

        #[command(flatten)]
        key: KeyArgs,
    },

    /// Unpack entries into a directory
    Extract {
        /// Archive file
        archive: PathBuf,

        /// Entry names to extract; all named entries when empty
        names: Vec<String>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Resolve scrambled names from this file, one name per line
        #[arg(long)]
        listfile: Option<PathBuf>,

        #[command(flatten)]
        key: KeyArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(LogFilter::from(cli.log_level))
        .with_target(false)
        .init();

    match cli.command {
        Commands::List {
            archive,
            listfile,
            key,
        } => commands::list::handle(&archive, listfile.as_deref(), &key),
        Commands::Create(args) => commands::pack::handle(&args, false),
        Commands::Add(args) => commands::pack::handle(&args, true),
        Commands::Test {
            archive,
            listfile,
            key,
        } => commands::verify::handle(&archive, listfile.as_deref(), &key),
        Commands::Extract {
            archive,
            names,
            out,
            listfile,
            key,
        } => commands::extract::handle(&archive, &names, &out, listfile.as_deref(), &key),
    }
}
