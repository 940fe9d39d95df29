use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "topolinkctl",
    version,
    about = "Talk to a topology simulation server controller"
)]
pub struct Cli {
    /// Settings file (defaults to <config dir>/topolink/settings.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Server URL, overriding settings and environment
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// Asset cache directory (defaults to <cache dir>/topolink/assets)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the version handshake and print the server version
    Version {
        /// Give up after this many seconds
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// GET a path and print the response body
    Get {
        path: String,
        /// Timeout in seconds (defaults to the configured synchronous timeout)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Download a static asset into the cache and print its path
    FetchStatic { url: String },
    /// Download a symbol icon into the cache and print its path
    FetchIcon { symbol: String },
    /// Print the effective settings as TOML
    ShowSettings,
}
