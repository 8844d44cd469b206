use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Report filesystem changes inside watched directories.
///
/// path-monitor registers each directory with inotify and prints one line per
/// change (created, removed, modified, renamed) until interrupted.
#[derive(Parser, Debug)]
#[command(
    name = "path-monitor",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch one or more directories and print every change.
    Watch {
        /// Directories to watch (not recursive).
        paths: Vec<PathBuf>,

        /// Print each event as a JSON object on its own line.
        #[arg(long)]
        json: bool,

        /// Exit after this many events.
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Directory containing path-monitor.toml.
        #[arg(long, default_value = ".")]
        config: PathBuf,

        /// Name reported in log output for this monitor.
        #[arg(long, default_value = "Path Monitor")]
        identifier: String,
    },
}
