//! `SpeechEngine`: provisioning plus synthesis behind one handle.
//!
//! The platform profile and configuration are fixed at construction.
//! `ensure_ready` installs the binary and the default voice at most once per
//! engine; concurrent callers share a single provisioning run.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::{AppPaths, ConfigError, ConfigUpdate, EnvSettings, ProvisionConfig};
use crate::error::{ErrorKind, PiperError, Result};
use crate::fetch::{DownloadProgress, Fetcher};
use crate::platform::{self, PlatformProfile};
use crate::provision::{BinaryProvisioner, VoiceModelProvisioner};
use crate::runner::{self, ProcessRunnerOptions};
use crate::wav::{self, DEFAULT_SAMPLE_RATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Preparing,
    Downloading,
    Synthesizing,
    Complete,
    Error,
}

/// Progress notification for spinners and progress bars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

impl ProgressEvent {
    fn new(status: ProgressStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            percent: None,
        }
    }

    fn with_percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent);
        self
    }
}

pub type ProgressCallback<'a> = dyn Fn(ProgressEvent) + Send + Sync + 'a;

/// Per-call synthesis overrides. Unset fields use the engine's config.
#[derive(Clone, Default)]
pub struct SynthesisOptions {
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub on_progress: Option<Arc<ProgressCallback<'static>>>,
}

impl SynthesisOptions {
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn on_progress(mut self, cb: Arc<ProgressCallback<'static>>) -> Self {
        self.on_progress = Some(cb);
        self
    }
}

/// A synthesized clip.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisResult {
    /// Complete WAV file.
    #[serde(skip)]
    pub audio: Vec<u8>,
    /// Seconds.
    pub duration: f64,
    pub sample_rate: u32,
}

pub struct SpeechEngine {
    profile: PlatformProfile,
    paths: AppPaths,
    config: Mutex<ProvisionConfig>,
    fetcher: Fetcher,
    ready: OnceCell<()>,
}

impl SpeechEngine {
    /// Engine for the host platform using the default install location and
    /// environment overrides.
    pub fn new() -> Result<Self> {
        Self::with_paths(AppPaths::resolve(), EnvSettings::from_env(), Fetcher::default())
    }

    pub fn with_paths(paths: AppPaths, settings: EnvSettings, fetcher: Fetcher) -> Result<Self> {
        let profile = platform::resolve()?;
        Ok(Self::with_profile(profile, paths, settings, fetcher))
    }

    pub fn with_profile(
        profile: PlatformProfile,
        paths: AppPaths,
        settings: EnvSettings,
        fetcher: Fetcher,
    ) -> Self {
        let config = ProvisionConfig::new(&paths, &profile, settings);
        info!(
            os = %profile.os,
            arch = %profile.arch,
            binary = %config.binary_path().display(),
            "Speech engine created"
        );
        Self {
            profile,
            paths,
            config: Mutex::new(config),
            fetcher,
            ready: OnceCell::new(),
        }
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    fn lock_config(&self) -> MutexGuard<'_, ProvisionConfig> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ProvisionConfig {
        self.lock_config().clone()
    }

    pub fn set_config(&self, update: ConfigUpdate) -> Result<(), ConfigError> {
        let mut config = self.lock_config();
        config.apply(update)?;
        info!(
            voice = %config.default_voice,
            speed = config.default_speed,
            timeout_ms = config.synthesis_timeout_ms,
            "Configuration updated"
        );
        Ok(())
    }

    /// Apply a change given as a config key and JSON value.
    pub fn set_config_value(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), ConfigError> {
        self.set_config(ConfigUpdate::from_key_value(key, value)?)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Release tag of the installed binary, if one has been provisioned.
    pub fn installed_version(&self) -> Option<String> {
        self.binary_provisioner().installed_version()
    }

    fn binary_provisioner(&self) -> BinaryProvisioner {
        let sources = self.lock_config().sources.clone();
        BinaryProvisioner::new(
            self.profile.clone(),
            self.paths.bin.clone(),
            sources,
            self.fetcher.clone(),
        )
    }

    fn voice_provisioner(&self) -> VoiceModelProvisioner {
        let config = self.lock_config();
        VoiceModelProvisioner::new(
            config.models_dir(),
            config.sources.voices_url.clone(),
            self.fetcher.clone(),
        )
    }

    /// Install the binary and default voice if needed.
    ///
    /// Runs at most once successfully. Concurrent callers wait for the same
    /// run; a failed run leaves the engine unready so the next call retries.
    pub async fn ensure_ready(&self, on_progress: Option<&ProgressCallback<'_>>) -> Result<()> {
        self.ready
            .get_or_try_init(|| self.provision(on_progress))
            .await
            .map(|_| ())
    }

    async fn provision(&self, on_progress: Option<&ProgressCallback<'_>>) -> Result<()> {
        let emit = |event: ProgressEvent| {
            if let Some(cb) = on_progress {
                cb(event);
            }
        };
        emit(ProgressEvent::new(
            ProgressStatus::Preparing,
            "Checking Piper installation",
        ));

        let voice = self.lock_config().default_voice.clone();
        let result: Result<()> = async {
            let binary_progress = |p: DownloadProgress| {
                emit(
                    ProgressEvent::new(
                        ProgressStatus::Downloading,
                        format!("Downloading Piper... {}%", p.percent),
                    )
                    .with_percent(p.percent),
                )
            };
            self.binary_provisioner()
                .ensure_binary(Some(&binary_progress))
                .await?;

            let voice_progress = |p: DownloadProgress| {
                emit(
                    ProgressEvent::new(
                        ProgressStatus::Downloading,
                        format!("Downloading voice {}... {}%", voice, p.percent),
                    )
                    .with_percent(p.percent),
                )
            };
            self.voice_provisioner()
                .ensure_model(&voice, Some(&voice_progress))
                .await?;
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => {
                info!(voice = %voice, "Speech engine ready");
                emit(ProgressEvent::new(ProgressStatus::Complete, "Ready").with_percent(100));
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, "Provisioning failed");
                emit(ProgressEvent::new(ProgressStatus::Error, e.to_string()));
            }
        }
        result
    }

    /// Synthesize `text` to a WAV clip.
    pub async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<SynthesisResult> {
        runner::validate_text(text)?;

        let on_progress = options.on_progress.as_deref();
        let emit = |event: ProgressEvent| {
            if let Some(cb) = on_progress {
                cb(event);
            }
        };

        let (binary, voice, speed, timeout) = {
            let config = self.lock_config();
            (
                config.binary_path().to_path_buf(),
                options
                    .voice
                    .clone()
                    .unwrap_or_else(|| config.default_voice.clone()),
                options.speed.unwrap_or(config.default_speed),
                config.synthesis_timeout(),
            )
        };

        self.ensure_ready(on_progress).await?;

        let voices = self.voice_provisioner();
        let voice_progress = |p: DownloadProgress| {
            emit(
                ProgressEvent::new(
                    ProgressStatus::Downloading,
                    format!("Downloading voice {}... {}%", voice, p.percent),
                )
                .with_percent(p.percent),
            )
        };
        let model = voices
            .ensure_model(&voice, Some(&voice_progress))
            .await?;
        let sample_rate = voices
            .read_model_config(&voice)
            .map(|c| c.audio.sample_rate)
            .unwrap_or(DEFAULT_SAMPLE_RATE);

        emit(ProgressEvent::new(
            ProgressStatus::Synthesizing,
            format!("Synthesizing with {}", voice),
        ));
        let options = ProcessRunnerOptions::new(binary, model, text)
            .speed(speed)
            .timeout(timeout);
        let pcm = runner::run(&options).await?;

        let audio = wav::wrap_pcm_as_wav(&pcm, sample_rate);
        let info = wav::parse_wav_header(&audio)?;
        info!(
            voice = %voice,
            chars = text.chars().count(),
            duration = info.duration,
            "Synthesized"
        );
        emit(ProgressEvent::new(ProgressStatus::Complete, "Synthesis complete").with_percent(100));

        Ok(SynthesisResult {
            audio,
            duration: info.duration,
            sample_rate: info.sample_rate,
        })
    }

    /// Synthesize and write the WAV to `path`.
    pub async fn synthesize_to_file(
        &self,
        text: &str,
        path: &Path,
        options: &SynthesisOptions,
    ) -> Result<SynthesisResult> {
        let result = self.synthesize(text, options).await?;
        tokio::fs::write(path, &result.audio).await.map_err(|e| {
            PiperError::with_source(
                ErrorKind::SynthesisFailed,
                format!("Failed to write {}", path.display()),
                e,
            )
        })?;
        info!(path = %path.display(), bytes = result.audio.len(), "Wrote WAV file");
        Ok(result)
    }

    /// Voices with weights in the models directory.
    pub fn list_installed_voices(&self) -> Result<Vec<String>> {
        self.voice_provisioner().list_installed_models()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{DownloadSources, DEFAULT_VOICE};
    use crate::fetch::RetryPolicy;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    /// Echoes its arguments to `args.txt` beside itself, swallows stdin and
    /// writes 0.1 s of 22.05 kHz silence.
    const STUB: &str = "#!/bin/sh\n\
        echo \"$@\" > \"$(dirname \"$0\")/args.txt\"\n\
        cat > /dev/null\n\
        head -c 4410 /dev/zero\n";

    fn fetcher() -> Fetcher {
        Fetcher::new(RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
        })
    }

    fn offline_settings() -> EnvSettings {
        EnvSettings {
            sources: DownloadSources {
                release_url: "http://127.0.0.1:9".into(),
                voices_url: "http://127.0.0.1:9".into(),
                ..DownloadSources::default()
            },
            ..EnvSettings::default()
        }
    }

    fn install_voice(models: &Path, name: &str, sample_rate: u32) {
        std::fs::create_dir_all(models).unwrap();
        std::fs::write(models.join(format!("{name}.onnx")), [1u8; 32]).unwrap();
        std::fs::write(
            models.join(format!("{name}.onnx.json")),
            format!(r#"{{"audio":{{"sample_rate":{sample_rate}}}}}"#),
        )
        .unwrap();
    }

    /// Engine with a stub binary and the default voice already installed.
    fn installed_engine(base: &Path) -> SpeechEngine {
        let paths = AppPaths::from_base(base);
        let engine = SpeechEngine::with_paths(paths, offline_settings(), fetcher()).unwrap();
        let binary = engine.config().binary_path().to_path_buf();
        std::fs::create_dir_all(binary.parent().unwrap()).unwrap();
        std::fs::write(&binary, STUB).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        install_voice(&engine.paths().models, DEFAULT_VOICE, 22050);
        engine
    }

    fn args_file(engine: &SpeechEngine) -> std::path::PathBuf {
        engine
            .config()
            .binary_path()
            .parent()
            .unwrap()
            .join("args.txt")
    }

    #[tokio::test]
    async fn test_hello_world_produces_wav() {
        let dir = tempfile::tempdir().unwrap();
        let engine = installed_engine(dir.path());
        assert!(!engine.is_ready());

        let result = engine
            .synthesize("Hello world", &SynthesisOptions::default())
            .await
            .unwrap();
        assert_eq!(&result.audio[0..4], b"RIFF");
        assert_eq!(&result.audio[8..12], b"WAVE");
        assert_eq!(result.sample_rate, 22050);
        assert!(result.duration > 0.0);
        assert!(engine.is_ready());
    }

    #[tokio::test]
    async fn test_speed_two_halves_length_scale() {
        let dir = tempfile::tempdir().unwrap();
        let engine = installed_engine(dir.path());
        engine
            .synthesize("Hello world", &SynthesisOptions::default().speed(2.0))
            .await
            .unwrap();

        let args = std::fs::read_to_string(args_file(&engine)).unwrap();
        assert!(args.contains("--length_scale 0.5"), "{args}");
        assert!(args.contains("--output-raw"));
        assert!(!args.contains("Hello"));
    }

    #[tokio::test]
    async fn test_text_limit_checked_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let engine = installed_engine(dir.path());

        let err = engine
            .synthesize(&"a".repeat(100_001), &SynthesisOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TextTooLong);
        assert!(!args_file(&engine).exists());

        engine
            .synthesize(&"a".repeat(100_000), &SynthesisOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = installed_engine(dir.path());
        let err = engine
            .synthesize("   ", &SynthesisOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyText);
    }

    #[tokio::test]
    async fn test_sample_rate_follows_voice_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let engine = installed_engine(dir.path());
        install_voice(&engine.paths().models, "en_US-lessac-low", 16000);

        let result = engine
            .synthesize("Hi", &SynthesisOptions::default().voice("en_US-lessac-low"))
            .await
            .unwrap();
        assert_eq!(result.sample_rate, 16000);
        assert!((result.duration - 4410.0 / 32000.0).abs() < 1e-9);
        assert_eq!(
            engine.list_installed_voices().unwrap(),
            ["en_US-amy-medium", "en_US-lessac-low"]
        );
    }

    #[tokio::test]
    async fn test_synthesize_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = installed_engine(dir.path());
        let out = dir.path().join("hello.wav");
        let result = engine
            .synthesize_to_file("Hello", &out, &SynthesisOptions::default())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), result.audio);

        let err = engine
            .synthesize_to_file(
                "Hello",
                &dir.path().join("missing").join("x.wav"),
                &SynthesisOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SynthesisFailed);
    }

    #[tokio::test]
    async fn test_progress_events_bracket_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let engine = installed_engine(dir.path());
        let seen: Arc<Mutex<Vec<ProgressStatus>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let cb = move |e: ProgressEvent| sink.lock().unwrap().push(e.status);

        engine.ensure_ready(Some(&cb)).await.unwrap();
        // Cached: a second call reports nothing.
        engine.ensure_ready(Some(&cb)).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            [ProgressStatus::Preparing, ProgressStatus::Complete]
        );
    }

    #[tokio::test]
    async fn test_failed_provisioning_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::from_base(dir.path());
        let engine = SpeechEngine::with_paths(paths, offline_settings(), fetcher()).unwrap();

        let err = engine.ensure_ready(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryDownloadFailed);
        assert!(!engine.is_ready());

        // Install by hand, then the next call succeeds.
        let binary = engine.config().binary_path().to_path_buf();
        std::fs::create_dir_all(binary.parent().unwrap()).unwrap();
        std::fs::write(&binary, STUB).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        install_voice(&engine.paths().models, DEFAULT_VOICE, 22050);
        engine.ensure_ready(None).await.unwrap();
        assert!(engine.is_ready());
    }

    #[tokio::test]
    async fn test_concurrent_ensure_ready_provisions_once() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use wiremock::matchers::{method, path, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let archive = {
            let mut builder =
                tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
            let mut header = tar::Header::new_gnu();
            header.set_size(STUB.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, "piper/piper", STUB.as_bytes())
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap()
        };

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/release/piper_.*\.tar\.gz$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/voices/en/en_US/amy/medium/en_US-amy-medium.onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 128]))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/voices/en/en_US/amy/medium/en_US-amy-medium.onnx.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let settings = EnvSettings {
            sources: DownloadSources {
                release_url: format!("{}/release", server.uri()),
                voices_url: format!("{}/voices", server.uri()),
                ..DownloadSources::default()
            },
            ..EnvSettings::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let engine =
            SpeechEngine::with_paths(AppPaths::from_base(dir.path()), settings, fetcher()).unwrap();

        let (a, b) = tokio::join!(engine.ensure_ready(None), engine.ensure_ready(None));
        a.unwrap();
        b.unwrap();
        assert!(engine.is_ready());
        assert_eq!(engine.installed_version().as_deref(), Some("2023.11.14-2"));
        server.verify().await;
    }

    #[test]
    fn test_set_config_value() {
        let dir = tempfile::tempdir().unwrap();
        let engine =
            SpeechEngine::with_paths(AppPaths::from_base(dir.path()), offline_settings(), fetcher())
                .unwrap();
        engine
            .set_config_value("defaultVoice", &serde_json::json!("en_GB-alba-medium"))
            .unwrap();
        assert!(engine
            .set_config_value("defaultSpeed", &serde_json::json!(3.0))
            .is_err());
        let config = engine.config();
        assert_eq!(config.default_voice, "en_GB-alba-medium");
        assert_eq!(config.default_speed, 1.0);
    }
}
