// src/infra/paths.rs — XDG-compliant path management
//
// All paths respect the DOSTT_HOME environment variable for isolation.
// When DOSTT_HOME is set, config and data live under that directory.
// When unset, config uses ~/.dostt/ and data uses XDG_DATA_HOME/dostt.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn dostt_home() -> Option<PathBuf> {
    std::env::var_os("DOSTT_HOME").map(PathBuf::from)
}

/// Configuration directory: $DOSTT_HOME/ or ~/.dostt/
pub fn config_dir() -> PathBuf {
    if let Some(home) = dostt_home() {
        return home;
    }
    dirs_home().join(".dostt")
}

/// Data directory: $DOSTT_HOME/data/ or ~/.local/share/dostt/
pub fn data_dir() -> PathBuf {
    if let Some(home) = dostt_home() {
        return home.join("data");
    }
    match ProjectDirs::from("", "", "dostt") {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => config_dir().join("data"),
    }
}

/// Home directory, falling back to the working directory when none is known.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Database path
pub fn db_path() -> PathBuf {
    data_dir().join("dostt.db")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Ensure config and data directories exist
pub async fn ensure_dirs() -> anyhow::Result<()> {
    for dir in [config_dir(), data_dir()] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    Ok(())
}
