//! piper-kit: speech synthesis service.
//!
//! Communicates with a parent process via JSON-line IPC on stdin/stdout.
//! Initializes logging and the engine, then runs the command loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use piper_kit::config::AppPaths;
use piper_kit::fetch::Fetcher;
use piper_kit::ipc::bridge::{emit_error, emit_event, emit_piper_error, spawn_stdin_reader};
use piper_kit::ipc::{SpeechCommand, SpeechEvent};
use piper_kit::{
    logger, AudioPlayer, EnvSettings, ErrorKind, PiperError, ProgressEvent, SpeechEngine,
    SynthesisOptions,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = AppPaths::resolve();
    if let Err(e) = logger::init(&paths.log_dir()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    // Emit starting event immediately so the parent knows we're alive.
    emit_event(&SpeechEvent::Starting {});

    let settings = EnvSettings::from_env();
    let engine = match SpeechEngine::with_paths(paths, settings, Fetcher::default()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            emit_piper_error(&e);
            return Err(e).context("Failed to initialize speech engine");
        }
    };
    let player = Arc::new(AudioPlayer::new());
    let playback_turn = Arc::new(tokio::sync::Mutex::new(()));
    info!(base = %engine.paths().base.display(), "piper-kit started");

    let mut cmd_rx = spawn_stdin_reader();
    // One listener for the whole loop so a SIGINT between commands is not lost.
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(command) => {
                    if !handle_command(command, &engine, &player, &playback_turn) {
                        break; // Stop command received
                    }
                }
                None => {
                    // stdin closed, parent process gone
                    info!("stdin closed, shutting down");
                    break;
                }
            },
            signal = &mut shutdown => {
                match signal {
                    Ok(()) => info!("Interrupted, shutting down"),
                    Err(e) => warn!(error = %e, "Ctrl-C listener failed, shutting down"),
                }
                emit_event(&SpeechEvent::Stopping {});
                break;
            }
        }
    }

    player.stop();
    info!("piper-kit shutting down");
    Ok(())
}

/// Handle a single command.
/// Returns `false` if the main loop should exit.
///
/// Long-running work (provisioning, synthesis, playback) runs on its own
/// task so `stop_playback` and `ping` stay responsive. A new `play` stops
/// the current clip and waits for its `playback_end` before starting.
fn handle_command(
    cmd: SpeechCommand,
    engine: &Arc<SpeechEngine>,
    player: &Arc<AudioPlayer>,
    playback_turn: &Arc<tokio::sync::Mutex<()>>,
) -> bool {
    match cmd {
        SpeechCommand::Ping {} => {
            emit_event(&SpeechEvent::Pong {});
        }

        SpeechCommand::Stop {} => {
            emit_event(&SpeechEvent::Stopping {});
            return false;
        }

        SpeechCommand::EnsureReady {} => {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                let progress = |e: ProgressEvent| emit_event(&SpeechEvent::Progress(e));
                match engine.ensure_ready(Some(&progress)).await {
                    Ok(()) => emit_ready(&engine),
                    Err(e) => emit_piper_error(&e),
                }
            });
        }

        SpeechCommand::Synthesize {
            text,
            voice,
            speed,
            output_path,
        } => {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                let path = output_path
                    .map(PathBuf::from)
                    .unwrap_or_else(|| default_output_path(&engine));
                let mut options = SynthesisOptions::default()
                    .on_progress(Arc::new(|e: ProgressEvent| {
                        emit_event(&SpeechEvent::Progress(e))
                    }));
                options.voice = voice;
                options.speed = speed;

                if let Some(parent) = path.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        warn!(dir = %parent.display(), error = %e, "Could not create output dir");
                    }
                }
                match engine.synthesize_to_file(&text, &path, &options).await {
                    Ok(result) => emit_event(&SpeechEvent::Synthesized {
                        path: path.display().to_string(),
                        duration: result.duration,
                        sample_rate: result.sample_rate,
                        bytes: result.audio.len(),
                    }),
                    Err(e) => emit_piper_error(&e),
                }
            });
        }

        SpeechCommand::ListVoices {} => match engine.list_installed_voices() {
            Ok(installed) => emit_event(&SpeechEvent::Voices { installed }),
            Err(e) => emit_piper_error(&e),
        },

        SpeechCommand::Play { path } => {
            let player = Arc::clone(player);
            let turn = Arc::clone(playback_turn);
            tokio::spawn(async move {
                let audio = match tokio::fs::read(&path).await {
                    Ok(audio) => audio,
                    Err(e) => {
                        let err = PiperError::with_source(
                            ErrorKind::PlaybackError,
                            format!("Failed to read {}", path),
                            e,
                        );
                        emit_piper_error(&err);
                        return;
                    }
                };
                player.stop();
                let _turn = turn.lock().await;
                emit_event(&SpeechEvent::PlaybackStart { path });
                match player.play(&audio).await {
                    Ok(()) => emit_event(&SpeechEvent::PlaybackEnd {}),
                    Err(e) => emit_piper_error(&e),
                }
            });
        }

        SpeechCommand::StopPlayback {} => {
            player.stop();
        }

        SpeechCommand::GetConfig {} => {
            emit_event(&SpeechEvent::Config {
                config: engine.config(),
            });
        }

        SpeechCommand::SetConfig { key, value } => match engine.set_config_value(&key, &value) {
            Ok(()) => emit_event(&SpeechEvent::Config {
                config: engine.config(),
            }),
            Err(e) => emit_error("INVALID_CONFIG", &e.to_string()),
        },
    }

    true
}

fn emit_ready(engine: &SpeechEngine) {
    emit_event(&SpeechEvent::Ready {
        binary: engine.config().binary_path().display().to_string(),
        version: engine.installed_version(),
    });
}

fn default_output_path(engine: &SpeechEngine) -> PathBuf {
    engine
        .paths()
        .cache
        .join(format!("speech-{}.wav", uuid::Uuid::new_v4()))
}
