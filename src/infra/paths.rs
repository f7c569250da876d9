// src/infra/paths.rs — Config path resolution
//
// Paths respect the SWITCHBOARD_HOME environment variable for isolation.
// When SWITCHBOARD_HOME is set, config lives under that directory; when
// unset, under ~/.switchboard/.

use std::path::PathBuf;

/// Returns the SWITCHBOARD_HOME override, if set.
fn switchboard_home() -> Option<PathBuf> {
    std::env::var_os("SWITCHBOARD_HOME").map(PathBuf::from)
}

/// Configuration directory: $SWITCHBOARD_HOME/ or ~/.switchboard/
pub fn config_dir() -> PathBuf {
    if let Some(home) = switchboard_home() {
        return home;
    }
    dirs_home().join(".switchboard")
}

/// Home directory
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .expect("Could not determine home directory")
        .home_dir()
        .to_path_buf()
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
