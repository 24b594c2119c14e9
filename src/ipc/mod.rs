//! IPC protocol types for driving the reader from another process.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (reader -> host).
//! Commands use `{"command": "<name>", ...}` format (host -> reader).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::pipeline::ProgressSnapshot;

// ---------------------------------------------------------------------------
// Events: reader -> host (stdout)
// ---------------------------------------------------------------------------

/// Process-level events. Session events (`ReaderEvent`) share the same
/// envelope and are written to the same stream.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum ControlEvent {
    Starting {},
    Ready { engine: String },
    Progress(ProgressSnapshot),
    Error { message: String },
    Pong {},
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: host -> reader (stdin)
// ---------------------------------------------------------------------------

/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum ReaderCommand {
    /// Read a file (`path`) or inline `text`. Voice and speed fall back to
    /// the configured defaults.
    Start {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        voice: Option<String>,
        #[serde(default)]
        speed: Option<f32>,
    },
    Pause {},
    Resume {},
    Stop {},
    Progress {},
    Ping {},
    Quit {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        let cmd: ReaderCommand =
            serde_json::from_str(r#"{"command":"start","path":"/tmp/a.txt","speed":1.3}"#).unwrap();
        match cmd {
            ReaderCommand::Start {
                path, text, voice, speed,
            } => {
                assert_eq!(path.as_deref(), Some("/tmp/a.txt"));
                assert!(text.is_none());
                assert!(voice.is_none());
                assert_eq!(speed, Some(1.3));
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(matches!(
            serde_json::from_str::<ReaderCommand>(r#"{"command":"pause"}"#).unwrap(),
            ReaderCommand::Pause {}
        ));
        assert!(serde_json::from_str::<ReaderCommand>(r#"{"command":"rewind"}"#).is_err());
    }

    #[test]
    fn test_event_shape() {
        let json = serde_json::to_value(ControlEvent::Progress(ProgressSnapshot::idle())).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["data"]["state"], "idle");
        assert_eq!(json["data"]["chunks_total"], 0);

        let json = serde_json::to_value(ControlEvent::Ready {
            engine: "espeak-ng".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "ready");
        assert_eq!(json["data"]["engine"], "espeak-ng");
    }
}
