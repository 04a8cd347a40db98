use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::*;

const DEFAULT_SUN_URL: &str = "https://example.com/verify?sun=";

#[derive(Parser)]
#[command(version, about = "Configure and check NTAG 424 DNA SUN/SDM mirrors")]
struct Cli {
    /// Debug level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the SUN URL a tag would produce
    SunEncode {
        /// Tag UID in hex, separators allowed
        #[arg(long, required = true)]
        uid: String,

        /// SDM read counter
        #[arg(long, default_value_t = 0)]
        counter: u32,

        /// SUN MAC key (32 hex chars)
        #[arg(long, required = true)]
        key: String,

        /// URL the mirror is appended to
        #[arg(long, default_value = DEFAULT_SUN_URL)]
        url: String,
    },

    /// Verify a SUN URL and print the UID and counter it carries
    SunVerify {
        /// Full URL as read from the tag
        #[arg(required = true)]
        mirrored: String,

        /// SUN MAC key (32 hex chars)
        #[arg(long, required = true)]
        key: String,

        /// URL the mirror is appended to
        #[arg(long, default_value = DEFAULT_SUN_URL)]
        url: String,

        /// UID length in bytes
        #[arg(long, default_value_t = 7)]
        uid_len: usize,
    },

    /// Validate a configuration file and show what would be written
    Check {
        /// JSON configuration, as sent by the front end
        #[arg(short, long, required = true)]
        config: PathBuf,

        /// UID used for the mirror preview
        #[arg(long)]
        uid: Option<String>,
    },

    /// Generate random keys for the empty key fields of a configuration file
    Keygen {
        /// JSON configuration, rewritten in place
        #[arg(short, long, required = true)]
        config: PathBuf,
    },

    /// Preview the backend URL for a tap
    Preview {
        /// JSON mirror settings (defaults if omitted)
        #[arg(short, long)]
        mirror: Option<PathBuf>,

        /// Tag UID in hex
        #[arg(long, required = true)]
        uid: String,

        /// Read counter
        #[arg(long, default_value_t = 0)]
        counter: u32,
    },

    /// Scan and configure a simulated tag, then tap it
    Simulate {
        /// JSON configuration, as sent by the front end
        #[arg(short, long, required = true)]
        config: PathBuf,

        /// Number of taps after writing
        #[arg(long, default_value_t = 1)]
        taps: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match &cli.command {
        Commands::SunEncode {
            uid,
            counter,
            key,
            url,
        } => sun_encode_command(uid, *counter, key, url)?,
        Commands::SunVerify {
            mirrored,
            key,
            url,
            uid_len,
        } => sun_verify_command(mirrored, key, url, *uid_len)?,
        Commands::Check { config, uid } => check_command(config, uid.as_deref())?,
        Commands::Keygen { config } => keygen_command(config)?,
        Commands::Preview {
            mirror,
            uid,
            counter,
        } => preview_command(mirror.as_ref(), uid, *counter)?,
        Commands::Simulate { config, taps } => simulate_command(config, *taps).await?,
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
}
