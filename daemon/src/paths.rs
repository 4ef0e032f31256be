/// Canonical file paths for the daemon's own files and for the game's files.
///
/// Daemon files live under <config dir>/tf2-presence/:
///   - config.toml        Written by the user, read by the daemon.
///   - status.toml        Written by the daemon, read by presence transports.
///   - custom_maps.json   Custom map classification cache.
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "tf2-presence";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const CUSTOM_MAP_CACHE_FILE_NAME: &str = "custom_maps.json";

/// The game writes its console here when launched with `-condebug`.
const CONSOLE_LOG_RELATIVE: [&str; 2] = ["tf", "console.log"];

/// Returns the application data directory, falling back to the working
/// directory on platforms without a per-user config dir.
pub fn app_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}

pub fn custom_map_cache_path() -> PathBuf {
    app_data_dir().join(CUSTOM_MAP_CACHE_FILE_NAME)
}

/// Derives `<install root>/tf/console.log` from the game executable, which
/// sits directly in the install root.
pub fn console_log_from_game_exe(game_exe: &Path) -> Option<PathBuf> {
    let root = game_exe.parent()?;
    Some(CONSOLE_LOG_RELATIVE.iter().fold(root.to_path_buf(), |p, c| p.join(c)))
}

/// The Steam client's install root is the directory containing its executable.
/// On Linux the running binary lives one level deeper, in `ubuntu12_32/`.
pub fn steam_root_from_exe(steam_exe: &Path) -> Option<PathBuf> {
    let dir = steam_exe.parent()?;
    if dir.file_name().is_some_and(|n| n == "ubuntu12_32") {
        dir.parent().map(Path::to_path_buf)
    } else {
        Some(dir.to_path_buf())
    }
}
