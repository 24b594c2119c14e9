//! Platform-specific data directory paths.
//!
//!   Windows: %APPDATA%/narrator/data
//!   macOS:   ~/Library/Application Support/narrator/data
//!   Linux:   $XDG_CONFIG_HOME/narrator/data (default ~/.config)

use std::path::PathBuf;

/// Application directory name under the platform config base.
pub const APP_DIR: &str = "narrator";

/// Get the reader's data directory (cross-platform).
pub fn get_data_dir() -> PathBuf {
    get_config_base().join(APP_DIR).join("data")
}

/// Directory for rolling log files.
pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Path to reader_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("reader_config.json")
}

/// Get the platform-appropriate base config directory.
fn get_config_base() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% (typically C:\Users\<user>\AppData\Roaming)
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
        dirs::config_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("AppData")
                .join("Roaming")
        })
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Application Support")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // Linux and other Unix: respect XDG_CONFIG_HOME, default ~/.config
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    }
}
