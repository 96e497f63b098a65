//! Host platform detection.
//!
//! Maps OS + CPU architecture to the provisioning profile used to pick the
//! right Piper release archive and the post-install fixes it needs.

use std::fmt;

use serde::Serialize;

use crate::error::{ErrorKind, PiperError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Darwin,
    Win32,
    Linux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArchiveFormat {
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "zip")]
    Zip,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Darwin => "darwin",
            Self::Win32 => "win32",
            Self::Linux => "linux",
        })
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
        })
    }
}

/// Everything the provisioners need to know about the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformProfile {
    pub os: Os,
    pub arch: Arch,
    /// Release asset key, e.g. `linux_x86_64` in `piper_linux_x86_64.tar.gz`.
    pub archive_key: &'static str,
    pub binary_extension: &'static str,
    pub archive_format: ArchiveFormat,
    pub needs_quarantine_fix: bool,
    pub needs_exec_bit_fix: bool,
}

impl PlatformProfile {
    /// File name of the synthesis executable on this platform.
    pub fn binary_name(&self) -> String {
        format!("piper{}", self.binary_extension)
    }

    /// File name of the release archive for this platform.
    pub fn archive_name(&self) -> String {
        format!("piper_{}.{}", self.archive_key, self.archive_format.extension())
    }
}

/// Resolve the profile of the running host.
pub fn resolve() -> Result<PlatformProfile> {
    resolve_for(std::env::consts::OS, std::env::consts::ARCH)
}

/// Resolve a profile for an explicit OS/arch pair.
///
/// Accepts both Rust target names (`macos`, `x86_64`, `aarch64`) and the
/// short names used in release assets (`darwin`, `win32`, `x64`, `arm64`).
pub fn resolve_for(os: &str, arch: &str) -> Result<PlatformProfile> {
    let unsupported = || {
        PiperError::new(
            ErrorKind::UnsupportedPlatform,
            format!("Unsupported platform: {}-{}", os, arch),
        )
    };

    let parsed_arch = match arch {
        "aarch64" | "arm64" => Some(Arch::Arm64),
        "x86_64" | "x64" | "amd64" => Some(Arch::X64),
        _ => None,
    };

    match os {
        "macos" | "darwin" => {
            // Anything that is not Apple Silicon gets the Intel build.
            let arch = parsed_arch.unwrap_or(Arch::X64);
            Ok(PlatformProfile {
                os: Os::Darwin,
                arch,
                archive_key: match arch {
                    Arch::Arm64 => "macos_aarch64",
                    Arch::X64 => "macos_x64",
                },
                binary_extension: "",
                archive_format: ArchiveFormat::TarGz,
                needs_quarantine_fix: true,
                needs_exec_bit_fix: true,
            })
        }
        "windows" | "win32" => Ok(PlatformProfile {
            os: Os::Win32,
            arch: Arch::X64,
            archive_key: "windows_amd64",
            binary_extension: ".exe",
            archive_format: ArchiveFormat::Zip,
            needs_quarantine_fix: false,
            needs_exec_bit_fix: false,
        }),
        "linux" => {
            let arch = parsed_arch.ok_or_else(unsupported)?;
            Ok(PlatformProfile {
                os: Os::Linux,
                arch,
                archive_key: match arch {
                    Arch::Arm64 => "linux_aarch64",
                    Arch::X64 => "linux_x86_64",
                },
                binary_extension: "",
                archive_format: ArchiveFormat::TarGz,
                needs_quarantine_fix: false,
                needs_exec_bit_fix: true,
            })
        }
        _ => Err(unsupported()),
    }
}

/// The host OS as an [`Os`], without resolving a full profile.
pub fn current_os() -> Option<Os> {
    match std::env::consts::OS {
        "macos" => Some(Os::Darwin),
        "windows" => Some(Os::Win32),
        "linux" => Some(Os::Linux),
        _ => None,
    }
}
