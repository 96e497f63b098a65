//! Platform-specific install directory paths.
//!
//!   Windows: %APPDATA%/piper-kit
//!   macOS:   ~/Library/Application Support/piper-kit
//!   Linux:   $XDG_DATA_HOME/piper-kit (default ~/.local/share)
//!
//! `PIPER_KIT_HOME` overrides the base on every platform.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "piper-kit";

/// The four directories everything in this crate reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub base: PathBuf,
    pub bin: PathBuf,
    pub models: PathBuf,
    pub cache: PathBuf,
    pub config: PathBuf,
}

impl AppPaths {
    /// Layout rooted at an explicit base directory.
    pub fn from_base(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        Self {
            bin: base.join("bin"),
            models: base.join("models"),
            cache: base.join("cache"),
            config: base.join("config"),
            base,
        }
    }

    /// Layout rooted at the platform's conventional data directory.
    pub fn resolve() -> Self {
        Self::from_base(get_base_dir())
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.cache.join("logs")
    }
}

/// Get the install base directory (cross-platform).
pub fn get_base_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("PIPER_KIT_HOME") {
        return PathBuf::from(home);
    }
    get_data_base().join(APP_DIR)
}

/// Get the platform-appropriate base data directory.
fn get_data_base() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% (typically C:\Users\<user>\AppData\Roaming)
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
        dirs::data_dir().unwrap_or_else(|| {
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
        if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
            return PathBuf::from(xdg);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".local")
            .join("share")
    }
}
