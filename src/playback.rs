//! Audio playback through the operating system's command-line player.
//!
//! The WAV bytes are written to a uniquely named temp file, handed to the
//! first player found on `PATH`, and the file is removed on every exit path.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, PiperError, Result};
use crate::platform::{self, Os};

/// How the audio file is passed to a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileArg {
    /// Appended as the last argument.
    Append,
    /// Embedded in a PowerShell `SoundPlayer` script.
    PowerShellScript,
}

/// One candidate command-line player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSpec {
    pub program: &'static str,
    args: &'static [&'static str],
    file_arg: FileArg,
}

impl PlayerSpec {
    /// A player invoked as `<program> <args...> <file>`.
    pub const fn new(program: &'static str, args: &'static [&'static str]) -> Self {
        Self {
            program,
            args,
            file_arg: FileArg::Append,
        }
    }

    fn command_args(&self, file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        match self.file_arg {
            FileArg::Append => args.push(file.as_os_str().to_owned()),
            FileArg::PowerShellScript => {
                let quoted = file.to_string_lossy().replace('\'', "''");
                args.push(
                    format!("(New-Object Media.SoundPlayer '{}').PlaySync()", quoted).into(),
                );
            }
        }
        args
    }
}

const LINUX_PLAYERS: &[PlayerSpec] = &[
    PlayerSpec::new("aplay", &[]),
    PlayerSpec::new("paplay", &[]),
    PlayerSpec::new("pw-play", &[]),
    PlayerSpec::new("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"]),
];

const MACOS_PLAYERS: &[PlayerSpec] = &[PlayerSpec::new("afplay", &[])];

const WINDOWS_PLAYERS: &[PlayerSpec] = &[PlayerSpec {
    program: "powershell",
    args: &["-NoProfile", "-Command"],
    file_arg: FileArg::PowerShellScript,
}];

/// Ordered player candidates for `os`.
pub fn candidates_for(os: Os) -> &'static [PlayerSpec] {
    match os {
        Os::Linux => LINUX_PLAYERS,
        Os::Darwin => MACOS_PLAYERS,
        Os::Win32 => WINDOWS_PLAYERS,
    }
}

/// Install guidance shown when no player is available.
pub fn install_guidance(os: Option<Os>) -> &'static str {
    match os {
        Some(Os::Linux) => {
            "Install one of: alsa-utils (aplay), pulseaudio-utils (paplay), \
             pipewire (pw-play) or ffmpeg (ffplay)"
        }
        Some(Os::Darwin) => "afplay ships with macOS; make sure /usr/bin is on PATH",
        Some(Os::Win32) => "Windows PowerShell is required for audio playback",
        None => "No supported audio player for this operating system",
    }
}

/// Removes its file when dropped.
struct TempAudioFile {
    path: PathBuf,
}

impl TempAudioFile {
    fn write(dir: &Path, audio: &[u8]) -> Result<Self> {
        let path = dir.join(format!("piper-kit-{}.wav", uuid::Uuid::new_v4()));
        std::fs::write(&path, audio).map_err(|e| {
            PiperError::with_source(
                ErrorKind::TempFileError,
                format!("Failed to write temp audio file {}", path.display()),
                e,
            )
        })?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempAudioFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Temp audio cleanup failed");
        }
    }
}

/// The clip currently tracked for `stop()`.
struct ActivePlayback {
    id: u64,
    stop: oneshot::Sender<()>,
}

/// Plays WAV bytes through an external player, one clip at a time.
///
/// Starting a clip while another is playing stops the older one.
pub struct AudioPlayer {
    os: Option<Os>,
    candidates: Vec<PlayerSpec>,
    detected: OnceLock<Option<PlayerSpec>>,
    temp_dir: PathBuf,
    current: Mutex<Option<ActivePlayback>>,
    next_id: AtomicU64,
}

impl Default for AudioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlayer {
    /// Player for the host OS, using the system temp directory.
    pub fn new() -> Self {
        let os = platform::current_os();
        let candidates = os.map(|os| candidates_for(os).to_vec()).unwrap_or_default();
        Self::with_candidates(os, candidates)
    }

    pub fn with_candidates(os: Option<Os>, candidates: Vec<PlayerSpec>) -> Self {
        Self {
            os,
            candidates,
            detected: OnceLock::new(),
            temp_dir: std::env::temp_dir(),
            current: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// First candidate present on `PATH`. Probed once per player.
    pub fn detect(&self) -> Option<PlayerSpec> {
        *self.detected.get_or_init(|| {
            let found = self
                .candidates
                .iter()
                .find(|c| which::which(c.program).is_ok())
                .copied();
            match &found {
                Some(p) => info!(player = p.program, "Audio player detected"),
                None => warn!("No audio player found on PATH"),
            }
            found
        })
    }

    /// Play `audio` (a complete WAV file) and wait for it to finish.
    ///
    /// Returns early with `Ok` when interrupted by [`stop`](Self::stop) or
    /// by a newer `play`.
    pub async fn play(&self, audio: &[u8]) -> Result<()> {
        let player = self.detect().ok_or_else(|| {
            PiperError::new(
                ErrorKind::NoAudioPlayer,
                format!("No audio player available. {}", install_guidance(self.os)),
            )
        })?;

        let temp = TempAudioFile::write(&self.temp_dir, audio)?;
        let mut child = Command::new(player.program)
            .args(player.command_args(temp.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PiperError::with_source(
                    ErrorKind::PlaybackError,
                    format!("Failed to start {}", player.program),
                    e,
                )
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let id = self.begin(stop_tx);
        debug!(id, player = player.program, file = %temp.path().display(), "Playing audio");

        // A dropped sender is not a stop request.
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            Ok(()) = stop_rx => {
                debug!(id, "Playback stopped");
                None
            }
        };
        self.finish(id);

        let status = match waited {
            Some(status) => status,
            None => {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Player already exited");
                }
                return Ok(());
            }
        };

        let status = status.map_err(|e| {
            PiperError::with_source(
                ErrorKind::PlaybackError,
                format!("Failed waiting for {}", player.program),
                e,
            )
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(PiperError::new(
                ErrorKind::PlaybackError,
                match status.code() {
                    Some(code) => format!("{} exited with code {}", player.program, code),
                    None => format!("{} was terminated by a signal", player.program),
                },
            ))
        }
    }

    /// Stop the clip being played, if any.
    pub fn stop(&self) {
        let active = self.current.lock().ok().and_then(|mut guard| guard.take());
        if let Some(active) = active {
            let _ = active.stop.send(());
        }
    }

    /// Whether a clip is currently playing.
    pub fn is_playing(&self) -> bool {
        self.current
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Track a new clip, stopping whichever one it replaces.
    fn begin(&self, stop: oneshot::Sender<()>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = match self.current.lock() {
            Ok(mut guard) => guard.replace(ActivePlayback { id, stop }),
            Err(_) => None,
        };
        if let Some(previous) = previous {
            info!(id = previous.id, "Stopping previous clip");
            let _ = previous.stop.send(());
        }
        id
    }

    /// Untrack clip `id` unless a newer clip has already taken its place.
    fn finish(&self, id: u64) {
        if let Ok(mut guard) = self.current.lock() {
            if guard.as_ref().is_some_and(|active| active.id == id) {
                *guard = None;
            }
        }
    }
}
