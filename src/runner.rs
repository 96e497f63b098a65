//! Invokes the Piper executable and classifies its failures.
//!
//! The command line is an argument vector, never a shell string, and the
//! text travels over stdin so arbitrary input cannot inject arguments.
//!
//! Speed maps to Piper's `--length_scale`, which is *inverse* speed: the
//! engine multiplies phoneme durations by it, so speed 2.0 becomes a length
//! scale of 0.5 and produces faster speech.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{validate_speed, DEFAULT_SPEED, DEFAULT_TIMEOUT_MS};
use crate::error::{ErrorKind, PiperError, Result};
use crate::process::{ExitOutcome, ProcessHandle};

/// Longest accepted input, in characters.
pub const MAX_TEXT_CHARS: usize = 100_000;
/// Diagnostics quoted in error messages are cut to this many characters.
const MAX_DIAGNOSTIC_CHARS: usize = 500;
/// NTSTATUS for a DLL that could not be found at process start.
const STATUS_DLL_NOT_FOUND: i32 = 0xC000_0135_u32 as i32;

const MISSING_LIBRARY_MARKERS: &[&str] = &[
    "error while loading shared libraries",
    "cannot open shared object file",
    "library not loaded",
    "image not found",
    "dll was not found",
];

const MISSING_LIBRARY_HINT: &str = "A shared library required by Piper is missing. \
     On Linux install your distribution's C++ runtime (libstdc++) and re-provision the binary; \
     on Windows install the Microsoft Visual C++ Redistributable; \
     on macOS delete the binary directory so it is downloaded again.";

#[derive(Debug, Clone)]
pub struct ProcessRunnerOptions {
    pub binary_path: PathBuf,
    pub model_path: PathBuf,
    pub text: String,
    pub speed: f32,
    pub timeout: Duration,
}

impl ProcessRunnerOptions {
    /// Options with the default speed (1.0) and timeout (30 s).
    pub fn new(
        binary_path: impl Into<PathBuf>,
        model_path: impl Into<PathBuf>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            binary_path: binary_path.into(),
            model_path: model_path.into(),
            text: text.into(),
            speed: DEFAULT_SPEED,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject empty or oversized text and out-of-range speeds.
    pub fn validate(&self) -> Result<()> {
        validate_text(&self.text)?;
        validate_speed(self.speed)
            .map_err(|reason| PiperError::new(ErrorKind::SynthesisFailed, reason))
    }

    /// Argument vector passed to the executable.
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "--model".into(),
            self.model_path.clone().into_os_string(),
            "--output-raw".into(),
            "--length_scale".into(),
            length_scale(self.speed).to_string().into(),
        ]
    }
}

/// Empty or whitespace-only text is `EmptyText`; more than
/// [`MAX_TEXT_CHARS`] characters is `TextTooLong`.
pub fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(PiperError::new(ErrorKind::EmptyText, "Text must not be empty"));
    }
    let chars = text.chars().count();
    if chars > MAX_TEXT_CHARS {
        return Err(PiperError::new(
            ErrorKind::TextTooLong,
            format!(
                "Text is {} characters; the limit is {}",
                chars, MAX_TEXT_CHARS
            ),
        ));
    }
    Ok(())
}

/// Piper's inverse-speed parameter.
pub fn length_scale(speed: f32) -> f32 {
    1.0 / speed
}

/// Run one synthesis and return the raw 16-bit PCM it wrote to stdout.
pub async fn run(options: &ProcessRunnerOptions) -> Result<Vec<u8>> {
    options.validate()?;

    let args = options.args();
    let mut handle = ProcessHandle::start(&options.binary_path, &args)
        .map_err(|e| classify_spawn_error(e, &options.binary_path))?;
    handle.write_input(options.text.clone().into_bytes());

    let outcome = handle.await_exit(options.timeout).await.map_err(|e| {
        PiperError::with_source(
            ErrorKind::SynthesisFailed,
            "Failed waiting for the synthesis process",
            e,
        )
    })?;

    match outcome {
        ExitOutcome::TimedOut => {
            warn!(timeout_ms = options.timeout.as_millis() as u64, "Synthesis timed out");
            Err(PiperError::new(
                ErrorKind::SynthesisTimeout,
                format!(
                    "Synthesis timed out after {}ms",
                    options.timeout.as_millis()
                ),
            ))
        }
        ExitOutcome::Exited {
            status,
            stdout,
            stderr,
        } => {
            let diagnostic = sanitize_diagnostic(&stderr);
            if status.success() && !stdout.is_empty() {
                info!(bytes = stdout.len(), "Synthesis complete");
                if !diagnostic.is_empty() {
                    debug!(stderr = %diagnostic, "Synthesis diagnostics");
                }
                return Ok(stdout);
            }

            if is_missing_library(&diagnostic) || status.code() == Some(STATUS_DLL_NOT_FOUND) {
                return Err(PiperError::new(
                    ErrorKind::BinaryPermissionDenied,
                    format!("{} ({})", MISSING_LIBRARY_HINT, diagnostic),
                ));
            }

            let reason = if status.success() {
                "produced no audio".to_string()
            } else {
                match status.code() {
                    Some(code) => format!("exited with code {}", code),
                    None => "was terminated by a signal".to_string(),
                }
            };
            let detail = if diagnostic.is_empty() {
                "no diagnostic output".to_string()
            } else {
                diagnostic
            };
            Err(PiperError::new(
                ErrorKind::SynthesisFailed,
                format!("Synthesis {}: {}", reason, detail),
            ))
        }
    }
}

fn classify_spawn_error(err: io::Error, binary: &Path) -> PiperError {
    match err.kind() {
        io::ErrorKind::NotFound => PiperError::with_source(
            ErrorKind::BinaryNotFound,
            format!("Piper binary not found at {}", binary.display()),
            err,
        ),
        io::ErrorKind::PermissionDenied => PiperError::with_source(
            ErrorKind::BinaryPermissionDenied,
            format!("Permission denied executing {}", binary.display()),
            err,
        ),
        _ => PiperError::with_source(
            ErrorKind::SynthesisFailed,
            format!("Failed to start {}", binary.display()),
            err,
        ),
    }
}

fn is_missing_library(diagnostic: &str) -> bool {
    let lower = diagnostic.to_lowercase();
    MISSING_LIBRARY_MARKERS.iter().any(|m| lower.contains(m))
}

/// Lossy-decode, drop control characters, collapse to one trimmed line of
/// at most [`MAX_DIAGNOSTIC_CHARS`] characters.
pub(crate) fn sanitize_diagnostic(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let cleaned: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\t' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.chars().count() > MAX_DIAGNOSTIC_CHARS {
        let cut: String = trimmed.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
        format!("{}…", cut)
    } else {
        trimmed.to_string()
    }
}
