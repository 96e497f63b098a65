//! Piper executable provisioning.
//!
//! missing → downloading → extracting → permission-fixing → verifying → ready.
//! Re-running is cheap: an executable already in place returns immediately.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::DownloadSources;
use crate::error::{ErrorKind, PiperError, Result};
use crate::fetch::{archive, Fetcher, ProgressFn};
use crate::platform::{ArchiveFormat, PlatformProfile};
use crate::process::{ExitOutcome, ProcessHandle};
use crate::runner::sanitize_diagnostic;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION_MARKER: &str = ".version";
/// Phrasings of "you left out a mandatory flag" across Piper releases.
const MISSING_ARGUMENT_MARKERS: &[&str] =
    &["is required", "required argument", "missing required"];

pub struct BinaryProvisioner {
    profile: PlatformProfile,
    install_dir: PathBuf,
    sources: DownloadSources,
    fetcher: Fetcher,
}

impl BinaryProvisioner {
    /// `install_dir` receives the archive; the executable ends up in
    /// `<install_dir>/piper/`.
    pub fn new(
        profile: PlatformProfile,
        install_dir: impl Into<PathBuf>,
        sources: DownloadSources,
        fetcher: Fetcher,
    ) -> Self {
        Self {
            profile,
            install_dir: install_dir.into(),
            sources,
            fetcher,
        }
    }

    pub fn binary_path(&self) -> PathBuf {
        self.install_dir
            .join("piper")
            .join(self.profile.binary_name())
    }

    fn archive_url(&self) -> String {
        format!(
            "{}/{}",
            self.sources.release_url.trim_end_matches('/'),
            self.profile.archive_name()
        )
    }

    /// Make sure a verified executable is installed and return its path.
    pub async fn ensure_binary(&self, on_progress: Option<&ProgressFn<'_>>) -> Result<PathBuf> {
        let binary = self.binary_path();
        if super::is_executable(&binary) {
            debug!(path = %binary.display(), "Piper binary already present");
            return Ok(binary);
        }

        let url = self.archive_url();
        let archive_path = self.install_dir.join(self.profile.archive_name());
        info!(url = %url, dest = %self.install_dir.display(), "Installing Piper binary");

        self.fetcher
            .download(&url, &archive_path, on_progress)
            .await
            .map_err(|e| {
                e.rewrap(
                    ErrorKind::BinaryDownloadFailed,
                    format!("Failed to download Piper from {}", url),
                )
            })?;

        let extracted = match self.profile.archive_format {
            ArchiveFormat::TarGz => archive::extract_tar_gz(&archive_path, &self.install_dir).await,
            ArchiveFormat::Zip => archive::extract_zip(&archive_path, &self.install_dir).await,
        };
        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            debug!(path = %archive_path.display(), error = %e, "Could not remove archive");
        }
        extracted.map_err(|e| {
            PiperError::with_source(
                ErrorKind::BinaryDownloadFailed,
                format!("Failed to extract {}", self.profile.archive_name()),
                e,
            )
        })?;

        if !binary.is_file() {
            return Err(PiperError::new(
                ErrorKind::BinaryDownloadFailed,
                format!(
                    "{} did not contain {}",
                    self.profile.archive_name(),
                    binary.display()
                ),
            ));
        }

        self.fix_permissions(&binary).await?;
        verify(&binary).await?;
        self.write_version_marker(&binary);

        info!(path = %binary.display(), "Piper binary ready");
        Ok(binary)
    }

    async fn fix_permissions(&self, binary: &Path) -> Result<()> {
        #[cfg(unix)]
        if self.profile.needs_exec_bit_fix {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(binary, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| {
                    PiperError::with_source(
                        ErrorKind::BinaryPermissionDenied,
                        format!("Failed to make {} executable", binary.display()),
                        e,
                    )
                })?;
        }

        if self.profile.needs_quarantine_fix {
            let dir = binary.parent().unwrap_or(binary);
            let result = tokio::process::Command::new("xattr")
                .args(["-dr", "com.apple.quarantine"])
                .arg(dir)
                .output()
                .await;
            match result {
                Ok(out) if out.status.success() => {
                    debug!(dir = %dir.display(), "Cleared quarantine attribute")
                }
                Ok(out) => warn!(
                    dir = %dir.display(),
                    stderr = %sanitize_diagnostic(&out.stderr),
                    "xattr failed, continuing"
                ),
                Err(e) => warn!(error = %e, "Could not run xattr, continuing"),
            }
        }
        Ok(())
    }

    fn write_version_marker(&self, binary: &Path) {
        let Some(marker) = binary.parent().map(|d| d.join(VERSION_MARKER)) else {
            return;
        };
        if marker.exists() {
            return;
        }
        let contents = format!(
            "{}\n{}\n",
            self.sources.release_tag,
            chrono::Utc::now().to_rfc3339()
        );
        if let Err(e) = std::fs::write(&marker, contents) {
            warn!(path = %marker.display(), error = %e, "Failed to write version marker");
        }
    }

    /// Release tag recorded when the binary was installed.
    pub fn installed_version(&self) -> Option<String> {
        let marker = self.binary_path().parent()?.join(VERSION_MARKER);
        let contents = std::fs::read_to_string(marker).ok()?;
        contents
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
    }
}

/// Run `--version` and accept either a clean exit or a complaint about a
/// missing required argument; both prove the executable loads.
async fn verify(binary: &Path) -> Result<()> {
    let corrupt = |detail: String| {
        PiperError::new(
            ErrorKind::BinaryCorrupt,
            format!("Piper binary at {} failed verification: {}", binary.display(), detail),
        )
    };

    let handle = ProcessHandle::start(binary, ["--version"]).map_err(|e| {
        PiperError::with_source(
            ErrorKind::BinaryCorrupt,
            format!("Piper binary at {} could not be started", binary.display()),
            e,
        )
    })?;
    let outcome = handle.await_exit(VERIFY_TIMEOUT).await.map_err(|e| {
        PiperError::with_source(ErrorKind::BinaryCorrupt, "Failed waiting for --version", e)
    })?;

    match outcome {
        ExitOutcome::TimedOut => Err(corrupt(format!(
            "no response within {}ms",
            VERIFY_TIMEOUT.as_millis()
        ))),
        ExitOutcome::Exited {
            status,
            stdout,
            stderr,
        } => {
            if status.success() {
                debug!(version = %sanitize_diagnostic(&stdout), "Piper binary verified");
                return Ok(());
            }
            let mut output = stdout;
            output.extend_from_slice(&stderr);
            let diagnostic = sanitize_diagnostic(&output);
            if is_missing_argument(&diagnostic) {
                debug!(diagnostic = %diagnostic, "Piper binary ran without arguments");
                return Ok(());
            }
            Err(corrupt(format!("exit {:?}: {}", status.code(), diagnostic)))
        }
    }
}

fn is_missing_argument(diagnostic: &str) -> bool {
    let lower = diagnostic.to_lowercase();
    MISSING_ARGUMENT_MARKERS.iter().any(|m| lower.contains(m))
}
