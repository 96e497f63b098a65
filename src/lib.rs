//! piper-kit: provisioning and execution of the Piper neural TTS engine.
//!
//! Downloads the platform's Piper release and voice models on demand, runs
//! synthesis as a bounded subprocess, and returns WAV audio. Playback is a
//! separate adapter driven by the caller.

pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod ipc;
pub mod logger;
pub mod platform;
pub mod playback;
pub mod process;
pub mod provision;
pub mod runner;
pub mod wav;

pub use config::{AppPaths, ConfigUpdate, EnvSettings, ProvisionConfig};
pub use engine::{
    ProgressCallback, ProgressEvent, ProgressStatus, SpeechEngine, SynthesisOptions,
    SynthesisResult,
};
pub use error::{ErrorKind, PiperError, Result};
pub use playback::AudioPlayer;
pub use platform::PlatformProfile;
pub use wav::WavInfo;
