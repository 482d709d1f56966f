use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "loopcast")]
#[command(author, version, about = "Loop a local video to an RTMP ingest")]
pub struct Cli {
    /// Path to config file
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
    /// Start the web control panel and API server
    #[command(alias = "serve")]
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Loop a single file to the ingest from the terminal until Ctrl+C
    Publish {
        /// Video file to stream
        #[arg(required = true)]
        input: PathBuf,

        /// Stream key appended to the ingest URL
        #[arg(short, long, env = "LOOPCAST_STREAM_KEY", hide_env_values = true)]
        key: String,

        /// Scale the output to a 720x1280 portrait frame
        #[arg(long)]
        vertical: bool,
    },

    /// Remove expired files from the upload directory
    Sweep {
        /// Override the retention period, in hours
        #[arg(long)]
        max_age_hours: Option<u64>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
