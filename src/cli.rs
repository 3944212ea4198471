//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Keep Arr download queues and download clients clean.
///
/// Cleanarr removes stalled, slow, blocked and failed-import downloads from
/// Sonarr/Radarr/Lidarr queues and cleans up seeding torrents once they have
/// met their category's limits.
#[derive(Parser, Debug)]
#[command(name = "cleanarr")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/cleanarr/config.toml)
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log every removal, move and search instead of performing it
    #[arg(long)]
    pub dry_run: bool,

    /// Run each enabled job once and exit
    #[arg(long)]
    pub once: bool,

    /// Validate the configuration file and exit
    #[arg(long, conflicts_with = "once")]
    pub check_config: bool,
}
