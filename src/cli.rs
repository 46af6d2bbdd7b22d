use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{DEFAULT_CHANNEL, DEFAULT_ORIGIN};
use crate::identity::EntityType;

#[derive(Debug, Parser)]
#[command(
    name = "watchmark",
    version,
    about = "Track watched episodes, seasons, series and movies by page URL"
)]
pub struct Cli {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true, env = "WATCHMARK_DB")]
    pub db: Option<PathBuf>,

    /// Site origin used to resolve relative paths
    #[arg(long, global = true, env = "WATCHMARK_ORIGIN", default_value = DEFAULT_ORIGIN)]
    pub origin: String,

    #[arg(long, global = true, env = "WATCHMARK_CHANNEL", default_value = DEFAULT_CHANNEL)]
    pub channel: String,

    #[arg(long, global = true, env = "WATCHMARK_BUSY_TIMEOUT_MS")]
    pub busy_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show how a URL or path is identified
    Analyze { input: String },
    Status { input: String },
    /// Advance an entity one step through its state cycle
    Toggle {
        input: String,
        /// Episode or season links listed on the page, included in cascades
        #[arg(long = "child")]
        children: Vec<String>,
    },
    /// Mark an episode or movie seen, as when its page is opened
    Mark { input: String },
    Unmark { input: String },
    List { kind: Option<EntityType> },
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    Import { file: PathBuf },
    /// Delete every tracked entry
    Reset {
        #[arg(long)]
        yes: bool,
    },
    Prefs,
    Locale { code: String },
    /// Toggle row highlighting
    Highlight,
}
