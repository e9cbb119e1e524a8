//! Filesystem locations.

use std::env;
use std::path::PathBuf;

/// Overrides the data directory outright.
pub const DATA_DIR_ENV: &str = "PAIRLINK_HOME";

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Return the user's home directory path.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn get_home_dir() -> Result<String, String> {
    non_empty_var("HOME")
        .or_else(|| non_empty_var("USERPROFILE"))
        .ok_or_else(|| "Home directory not set".to_string())
}

/// Where sessions and credentials live when no `--data-dir` is given:
/// `$PAIRLINK_HOME`, else `<home>/.pairlink`.
pub fn default_data_dir() -> Result<PathBuf, String> {
    if let Some(dir) = non_empty_var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    Ok(PathBuf::from(get_home_dir()?).join(".pairlink"))
}
