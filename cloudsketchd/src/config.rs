use std::path::{Path, PathBuf};

use anyhow::Context;

const DATA_SUBDIR: &str = "cloudsketch";
const PREFS_FILE_NAME: &str = "sync-prefs.json";

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Externally configured data directory the local mirror lives under.
    pub data_dir: PathBuf,
    /// Override for the Create API base URL; `None` means production.
    pub api_base: Option<String>,
    pub prefs_file: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let data_dir = std::env::var("CLOUDSKETCH_DATA_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_data_dir);
        let api_base = std::env::var("CLOUDSKETCH_API_BASE")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let prefs_file = std::env::var("CLOUDSKETCH_PREFS_FILE")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| data_dir.join(PREFS_FILE_NAME));

        Ok(Self {
            data_dir,
            api_base,
            prefs_file,
        })
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DATA_SUBDIR)
}

pub(crate) fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}
