use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::cli::Cli;
use crate::paths::database_file_path;

pub const DEFAULT_ORIGIN: &str = "https://www.streaming.example";
pub const DEFAULT_CHANNEL: &str = "watchmark-sync";
pub const DEFAULT_STORAGE_KEY: &str = "watchmark-sync-signal";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub origin: Url,
    pub channel_name: String,
    pub storage_key: String,
    pub busy_timeout: Duration,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let database_path = match &cli.db {
            Some(path) => path.clone(),
            None => database_file_path()?,
        };
        let origin = Url::parse(cli.origin.trim())
            .with_context(|| format!("invalid site origin '{}'", cli.origin))?;
        if !matches!(origin.scheme(), "http" | "https") {
            anyhow::bail!("site origin must be an http(s) URL, got '{origin}'");
        }

        Ok(Self {
            database_path,
            origin,
            channel_name: cli.channel.clone(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            busy_timeout: Duration::from_millis(cli.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)),
        })
    }
}
