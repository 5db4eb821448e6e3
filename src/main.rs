use ardat::cli::{
    archive_with, extract_with, show_info, show_info_json, ArchiveOptions, ExtractOptions,
};
use ardat::pipeline::{AesKey, Strategy};
use ardat::tree::FilterKind;
use ardat::{ArdatError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// Version info from build.rs
const VERSION: &str = env!("ARDAT_VERSION");
const PROFILE: &str = env!("ARDAT_PROFILE");
const GIT_HASH: &str = env!("ARDAT_GIT_HASH");

fn get_version() -> &'static str {
    use std::sync::OnceLock;
    static VERSION_STRING: OnceLock<String> = OnceLock::new();
    VERSION_STRING.get_or_init(|| format!("{} {} ({})", PROFILE, VERSION, GIT_HASH))
}

#[derive(Parser)]
#[command(name = "ardat")]
#[command(author, about = "Streaming file archiver with optional AES encryption", long_about = None)]
struct Cli {
    /// Print version
    #[arg(short = 'V', long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a file or directory into a new archive
    #[command(alias = "a")]
    Archive {
        /// File or directory to pack
        source: PathBuf,

        /// Archive to create (must not exist)
        destination: PathBuf,

        /// Encrypt file contents with this AES key (32, 48 or 64 hex digits)
        #[arg(long, value_parser = parse_key)]
        key: Option<AesKey>,

        /// Block mode used with --key
        #[arg(long, value_parser = parse_strategy)]
        mode: Option<Strategy>,

        /// Store file contents as hex text
        #[arg(long)]
        hex: bool,
    },

    /// Restore an archive into an existing directory
    #[command(alias = "x")]
    Extract {
        /// Archive to read
        source: PathBuf,

        /// Existing directory to restore into
        destination: PathBuf,

        /// AES key used when the archive was made
        #[arg(long, value_parser = parse_key)]
        key: Option<AesKey>,
    },

    /// Show information about an archive
    #[command(alias = "i")]
    Info {
        /// Archive to inspect
        file: PathBuf,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_key(s: &str) -> std::result::Result<AesKey, String> {
    AesKey::from_hex(s).map_err(|e| format!("{}", e))
}

fn parse_strategy(s: &str) -> std::result::Result<Strategy, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn archive_options(
    key: Option<AesKey>,
    mode: Option<Strategy>,
    hex: bool,
) -> Result<ArchiveOptions> {
    let mut filters = Vec::new();
    match (&key, mode) {
        (Some(_), mode) => filters.push(FilterKind::Aes(mode.unwrap_or_default())),
        (None, Some(_)) => return Err(ArdatError::usage("--mode requires --key")),
        (None, None) => {}
    }
    if hex {
        filters.push(FilterKind::Hex);
    }
    Ok(ArchiveOptions { filters, key })
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Archive {
            source,
            destination,
            key,
            mode,
            hex,
        } => {
            let options = archive_options(key, mode, hex)?;
            let summary = archive_with(&source, &destination, &options)?;
            println!(
                "Archived {} entries into {} ({} bytes)",
                summary.entries,
                destination.display(),
                summary.bytes
            );
        }
        Commands::Extract {
            source,
            destination,
            key,
        } => {
            let count = extract_with(&source, &destination, &ExtractOptions { key })?;
            println!("Extracted {} entries into {}", count, destination.display());
        }
        Commands::Info { file, json } => {
            let text = if json {
                show_info_json(&file)?
            } else {
                show_info(&file)?
            };
            println!("{}", text);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if cli.version {
        println!("ardat {}", get_version());
        return ExitCode::SUCCESS;
    }

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            use clap::CommandFactory;
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
            println!();
            return ExitCode::SUCCESS;
        }
    };

    match run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
