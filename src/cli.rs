use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "debrid-dl")]
#[command(author, version, about = "Unlock and download links through AllDebrid", long_about = None)]
pub struct Args {
    /// AllDebrid API key (overrides config file and ALLDEBRID_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// Download directory (default: ~/Downloads)
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Config file (default: ~/.config/debrid-dl/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Unlock and download links or magnets. Reads stdin when no links are given.
    Download {
        /// Text containing links; URLs and magnet URIs are extracted from it
        links: Vec<String>,

        /// Read link text from a file
        #[arg(short = 'f', long)]
        from_file: Option<PathBuf>,

        /// Skip links that already appear in the download history
        #[arg(long)]
        skip_duplicates: bool,
    },

    /// Show the local download history
    History {
        /// Only show entries whose title, path or links contain this text
        query: Option<String>,
    },

    /// Browse magnets stored on the account
    Magnets {
        #[command(subcommand)]
        action: Option<MagnetAction>,
    },

    /// Upload .torrent files to the account
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Manage saved links on the account
    Links {
        #[command(subcommand)]
        action: Option<LinkAction>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum MagnetAction {
    /// List magnets with status and available links (default)
    List,
    /// Delete a magnet
    Delete { id: u64 },
    /// Save the magnet's first link to the account's saved links
    Save { id: u64 },
    /// Print a direct download URL for the magnet's first link
    Unlock { id: u64 },
}

#[derive(Subcommand, Debug, Clone)]
pub enum LinkAction {
    /// List saved links (default)
    List,
    /// Delete a saved link
    Delete { link: String },
}
