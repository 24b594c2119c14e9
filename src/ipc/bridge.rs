//! IPC bridge: stdin reader and stdout event emitter.
//!
//! A blocking stdin reader thread sends deserialized commands through an
//! mpsc channel; events are written to stdout as JSON lines.

use std::io::{self, BufRead, Write};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{ControlEvent, ReaderCommand};

/// Emit any event as a JSON line on stdout and flush.
pub fn emit_event<E: Serialize>(event: &E) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Pipe may be closed.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

pub fn emit_error(message: &str) {
    emit_event(&ControlEvent::Error {
        message: message.to_string(),
    });
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Result<ReaderCommand, serde_json::Error>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed))
}

/// Spawn a blocking thread that reads JSON lines from stdin and forwards
/// parsed commands through the returned channel.
///
/// The thread exits when stdin is closed or the receiver is dropped.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<ReaderCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            let text = match line {
                Ok(text) => text,
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            };
            match parse_command(&text) {
                None => continue,
                Some(Ok(cmd)) => {
                    debug!(?cmd, "Received command");
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Invalid JSON command: {} (input: {})", e, text.trim());
                    emit_error(&format!("Invalid JSON command: {}", e));
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}
