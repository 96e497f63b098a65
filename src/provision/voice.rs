//! Voice model provisioning.
//!
//! A voice is two files in the models directory: `<name>.onnx` (weights) and
//! `<name>.onnx.json` (sidecar config). Names are validated before any path
//! is built from them.

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::{read_json_file, ModelConfig};
use crate::error::{ErrorKind, PiperError, Result};
use crate::fetch::{Fetcher, ProgressFn};

static VOICE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("voice name pattern"));

/// A validated `{lang}_{region}-{speaker}-{quality}` voice name,
/// e.g. `en_US-amy-medium`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceName {
    name: String,
    lang: String,
    region: String,
    speaker: String,
    quality: String,
}

impl VoiceName {
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |why: &str| {
            PiperError::new(
                ErrorKind::ModelNotFound,
                format!("Invalid voice name {:?}: {}", name, why),
            )
        };

        if !VOICE_NAME_RE.is_match(name) {
            return Err(invalid("only letters, digits, '_' and '-' are allowed"));
        }

        let (locale, rest) = name
            .split_once('-')
            .ok_or_else(|| invalid("expected {lang}_{region}-{speaker}-{quality}"))?;
        let (speaker, quality) = rest
            .rsplit_once('-')
            .ok_or_else(|| invalid("missing quality suffix"))?;
        let (lang, region) = locale
            .split_once('_')
            .ok_or_else(|| invalid("locale must be {lang}_{region}"))?;

        if [lang, region, speaker, quality].iter().any(|p| p.is_empty()) {
            return Err(invalid("empty name component"));
        }

        Ok(Self {
            name: name.to_string(),
            lang: lang.to_string(),
            region: region.to_string(),
            speaker: speaker.to_string(),
            quality: quality.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Path of the voice files relative to the repository root, without
    /// extension: `en/en_US/amy/medium/en_US-amy-medium`.
    fn remote_stem(&self) -> String {
        format!(
            "{}/{}_{}/{}/{}/{}",
            self.lang, self.lang, self.region, self.speaker, self.quality, self.name
        )
    }
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub struct VoiceModelProvisioner {
    models_dir: PathBuf,
    voices_url: String,
    fetcher: Fetcher,
}

impl VoiceModelProvisioner {
    pub fn new(
        models_dir: impl Into<PathBuf>,
        voices_url: impl Into<String>,
        fetcher: Fetcher,
    ) -> Self {
        Self {
            models_dir: models_dir.into(),
            voices_url: voices_url.into(),
            fetcher,
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    fn weights_path(&self, voice: &VoiceName) -> PathBuf {
        self.models_dir.join(format!("{}.onnx", voice))
    }

    fn sidecar_path(&self, voice: &VoiceName) -> PathBuf {
        self.models_dir.join(format!("{}.onnx.json", voice))
    }

    /// Make sure both files of `name` are present and return the weights path.
    pub async fn ensure_model(
        &self,
        name: &str,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<PathBuf> {
        let voice = VoiceName::parse(name)?;
        let weights = self.weights_path(&voice);
        let sidecar = self.sidecar_path(&voice);

        if is_complete(&weights, &sidecar) {
            debug!(voice = %voice, "Voice model already present");
            return Ok(weights);
        }

        let base = self.voices_url.trim_end_matches('/');
        let weights_url = format!("{}/{}.onnx", base, voice.remote_stem());
        let sidecar_url = format!("{}/{}.onnx.json", base, voice.remote_stem());
        info!(voice = %voice, url = %weights_url, "Downloading voice model");

        let downloaded: Result<()> = async {
            self.fetcher.download(&weights_url, &weights, on_progress).await?;
            self.fetcher.download(&sidecar_url, &sidecar, None).await
        }
        .await;

        if let Err(e) = downloaded {
            for path in [&weights, &sidecar] {
                if let Err(rm) = tokio::fs::remove_file(path).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        debug!(path = %path.display(), error = %rm, "Cleanup failed");
                    }
                }
            }
            return Err(e.rewrap(
                ErrorKind::ModelDownloadFailed,
                format!("Failed to download voice {}", voice),
            ));
        }

        if !is_complete(&weights, &sidecar) {
            return Err(PiperError::new(
                ErrorKind::ModelCorrupt,
                format!("Voice {} downloaded but its files are empty or unreadable", voice),
            ));
        }

        info!(voice = %voice, path = %weights.display(), "Voice model ready");
        Ok(weights)
    }

    /// Names of every voice with weights in the models directory, sorted.
    pub fn list_installed_models(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.models_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PiperError::with_source(
                    ErrorKind::ModelNotFound,
                    format!("Failed to read {}", self.models_dir.display()),
                    e,
                ))
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|n| n.strip_suffix(".onnx"))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Parse the sidecar of an installed voice. `None` when absent or invalid.
    pub fn read_model_config(&self, name: &str) -> Option<ModelConfig> {
        let voice = VoiceName::parse(name).ok()?;
        read_json_file(&self.sidecar_path(&voice))
    }
}

fn is_complete(weights: &Path, sidecar: &Path) -> bool {
    let weights_ok = std::fs::metadata(weights)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);
    if !weights_ok {
        return false;
    }
    match std::fs::File::open(sidecar) {
        Ok(_) => true,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %sidecar.display(), error = %e, "Voice sidecar unreadable");
            }
            false
        }
    }
}
