use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub fn database_file_path() -> Result<PathBuf> {
    if let Ok(custom) = env::var("WATCHMARK_DATA_DIR") {
        return Ok(PathBuf::from(custom).join("watchmark.db"));
    }

    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("watchmark").join("watchmark.db"))
}
