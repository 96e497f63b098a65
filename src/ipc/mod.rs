//! IPC protocol types for driving the engine from a parent process.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (engine -> parent).
//! Commands use `{"command": "<name>", ...}` format (parent -> engine).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::config::ProvisionConfig;
use crate::engine::ProgressEvent;

// ---------------------------------------------------------------------------
// Events: engine -> parent (stdout)
// ---------------------------------------------------------------------------

/// All events emitted via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum SpeechEvent {
    Starting {},
    Progress(ProgressEvent),
    Ready {
        binary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    Synthesized {
        path: String,
        duration: f64,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        bytes: usize,
    },
    Voices { installed: Vec<String> },
    PlaybackStart { path: String },
    PlaybackEnd {},
    Config { config: ProvisionConfig },
    Error { code: String, message: String },
    Pong {},
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: parent -> engine (stdin)
// ---------------------------------------------------------------------------

/// All commands received via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum SpeechCommand {
    Ping {},
    EnsureReady {},
    Synthesize {
        text: String,
        #[serde(default)]
        voice: Option<String>,
        #[serde(default)]
        speed: Option<f32>,
        #[serde(default)]
        output_path: Option<String>,
    },
    ListVoices {},
    Play {
        path: String,
    },
    StopPlayback {},
    GetConfig {},
    SetConfig {
        key: String,
        #[serde(default)]
        value: serde_json::Value,
    },
    Stop {},
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ProgressStatus;

    #[test]
    fn test_parse_synthesize_command() {
        let cmd: SpeechCommand = serde_json::from_str(
            r#"{"command":"synthesize","text":"Hello","speed":1.5,"output_path":"/tmp/a.wav"}"#,
        )
        .unwrap();
        match cmd {
            SpeechCommand::Synthesize {
                text,
                voice,
                speed,
                output_path,
            } => {
                assert_eq!(text, "Hello");
                assert_eq!(voice, None);
                assert_eq!(speed, Some(1.5));
                assert_eq!(output_path.as_deref(), Some("/tmp/a.wav"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unit_commands_parse() {
        for name in ["ping", "ensure_ready", "list_voices", "stop_playback", "get_config", "stop"] {
            let json = format!(r#"{{"command":"{}"}}"#, name);
            assert!(serde_json::from_str::<SpeechCommand>(&json).is_ok(), "{name}");
        }
        assert!(serde_json::from_str::<SpeechCommand>(r#"{"command":"dance"}"#).is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(SpeechEvent::Error {
            code: "MODEL_NOT_FOUND".into(),
            message: "no such voice".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "error",
                "data": {"code": "MODEL_NOT_FOUND", "message": "no such voice"}
            })
        );

        let json = serde_json::to_value(SpeechEvent::Progress(ProgressEvent {
            status: ProgressStatus::Downloading,
            message: "Downloading Piper... 40%".into(),
            percent: Some(40),
        }))
        .unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["data"]["status"], "downloading");
        assert_eq!(json["data"]["percent"], 40);

        let json = serde_json::to_value(SpeechEvent::Pong {}).unwrap();
        assert_eq!(json["event"], "pong");
    }
}
