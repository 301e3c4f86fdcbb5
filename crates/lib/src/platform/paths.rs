use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Environment variable overriding the state directory.
pub const HOME_ENV: &str = "POSSUM_HOME";

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE").map(PathBuf::from).unwrap_or_default()
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default()
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory holding all persisted state.
///
/// `POSSUM_HOME` takes precedence over the platform data directory.
pub fn state_dir() -> PathBuf {
  match std::env::var_os(HOME_ENV) {
    Some(path) if !path.is_empty() => PathBuf::from(path),
    _ => data_dir(),
  }
}

/// Returns the directory holding cloud credentials for the upload client
pub fn aws_config_dir() -> PathBuf {
  home_dir().join(".aws")
}
