//! Narrator: batched text-to-speech reader.
//!
//! Driven by JSON-line commands on stdin; emits JSON-line events on stdout.
//! Logs go to stderr and a rolling file under the data directory.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use narrator_core::config::{get_log_dir, read_reader_config};
use narrator_core::ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use narrator_core::ipc::{ControlEvent, ReaderCommand};
use narrator_core::tts::{create_tts_engine, AudioSink, RodioSink, TtsEngine};
use narrator_core::{DocumentSource, Reader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = narrator_core::logger::init(&get_log_dir()) {
        narrator_core::logger::init_console();
        warn!("File logging unavailable: {:#}", e);
    }

    // Emit starting event immediately so the host knows we're alive.
    emit_event(&ControlEvent::Starting {});

    let config = read_reader_config();
    info!(?config, "Configuration loaded");

    let engine: Arc<dyn TtsEngine> = match create_tts_engine(&config.engine) {
        Ok(engine) => Arc::from(engine),
        Err(e) => {
            error!("Failed to create TTS engine: {:#}", e);
            emit_error(&format!("Failed to create TTS engine: {}", e));
            return Err(e);
        }
    };
    let sink: Arc<dyn AudioSink> = Arc::new(RodioSink::new(
        config.output_device.clone(),
        config.volume,
    ));
    let engine_name = engine.name();
    let reader = Reader::new(engine, sink, config);

    let mut cmd_rx = spawn_stdin_reader();
    let mut events = reader.subscribe();

    emit_event(&ControlEvent::Ready {
        engine: engine_name,
    });
    info!("Narrator ready");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(&reader, command).await {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => emit_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event forwarder lagged");
                        emit_event(&ControlEvent::Progress(reader.progress()));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    reader.shutdown().await;
    info!("Narrator shutting down");
    Ok(())
}

/// Handle a single command. Returns `false` if the main loop should exit.
async fn handle_command(reader: &Reader, cmd: ReaderCommand) -> bool {
    match cmd {
        ReaderCommand::Start {
            path,
            text,
            voice,
            speed,
        } => {
            let document = match (path, text) {
                (Some(path), _) => DocumentSource::Path(PathBuf::from(path)),
                (None, Some(text)) => DocumentSource::Text(text),
                (None, None) => {
                    emit_error("start requires either \"path\" or \"text\"");
                    return true;
                }
            };
            let voice = voice.unwrap_or_else(|| reader.config().voice.clone());
            let speed = speed.unwrap_or(reader.config().speed);
            if let Err(e) = reader.start(document, &voice, speed).await {
                error!("Failed to start reading: {}", e);
                emit_error(&e.to_string());
            }
        }

        ReaderCommand::Pause {} => {
            reader.pause();
        }

        ReaderCommand::Resume {} => {
            reader.resume();
        }

        ReaderCommand::Stop {} => {
            reader.stop();
        }

        ReaderCommand::Progress {} => {
            emit_event(&ControlEvent::Progress(reader.progress()));
        }

        ReaderCommand::Ping {} => {
            emit_event(&ControlEvent::Pong {});
        }

        ReaderCommand::Quit {} => {
            emit_event(&ControlEvent::Stopping {});
            return false;
        }
    }

    true
}
