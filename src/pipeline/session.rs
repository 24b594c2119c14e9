//! Reader control surface and per-session wiring.
//!
//! Every `start` builds a fresh session: its own state cell, channels,
//! progress counters, cancel flag and artifact directory. Nothing from a
//! previous session can reach the new one.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::artifacts::ArtifactStore;
use super::assembler::{AssemblerTask, BatchAssembler};
use super::controller::{Controller, PlaybackControl, PlaybackState, StateCell};
use super::progress::{ProgressReporter, ProgressSnapshot, ReaderEvent, EVENT_CHANNEL_CAPACITY};
use super::queue::{generation_queue, QueueReceiver, QueueSender};
use super::segment::Segmenter;
use super::worker::{worker_count, WorkerContext, WorkerPool};
use super::{CancelFlag, Chunk, GenerationTask, VoiceParams};
use crate::config::ReaderConfig;
use crate::error::{ExtractionError, ReaderError};
use crate::extract;
use crate::tts::{AudioSink, TtsEngine};

/// What to read.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Text(String),
}

/// Cancels generation and releases every artifact of one session.
/// Safe to run more than once.
#[derive(Clone)]
pub struct Teardown {
    cancel: CancelFlag,
    queue: QueueReceiver,
    store: Arc<ArtifactStore>,
}

impl Teardown {
    pub fn new(cancel: CancelFlag, queue: QueueReceiver, store: Arc<ArtifactStore>) -> Self {
        Self {
            cancel,
            queue,
            store,
        }
    }

    pub fn run(&self) {
        self.cancel.cancel();
        self.queue.close();
        self.store.release_all();
    }
}

struct Session {
    id: Uuid,
    control: Arc<PlaybackControl>,
    teardown: Teardown,
    /// Feeder and assembler; aborted on stop.
    tasks: Vec<JoinHandle<()>>,
    /// Exits on its own once the sink returns; awaited before the next
    /// session starts playing.
    controller: Option<JoinHandle<()>>,
}

impl Session {
    /// Force `Stopped` and tear down. Returns the previous state.
    fn stop(&mut self) -> PlaybackState {
        let previous = self.control.stop();
        self.teardown.run();
        for task in &self.tasks {
            task.abort();
        }
        previous
    }
}

/// The reader: owns the engine and sink, runs one session at a time.
pub struct Reader {
    engine: Arc<dyn TtsEngine>,
    sink: Arc<dyn AudioSink>,
    config: ReaderConfig,
    events: broadcast::Sender<ReaderEvent>,
    /// State reported when no session exists.
    idle: StateCell,
    session: Mutex<Option<Session>>,
    /// Held for the whole of `start`, so sessions are replaced one at a time.
    starting: tokio::sync::Mutex<()>,
}

impl Reader {
    pub fn new(engine: Arc<dyn TtsEngine>, sink: Arc<dyn AudioSink>, config: ReaderConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            engine,
            sink,
            config,
            events,
            idle: StateCell::new(),
            session: Mutex::new(None),
            starting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Observer events for every session started by this reader.
    pub fn subscribe(&self) -> broadcast::Receiver<ReaderEvent> {
        self.events.subscribe()
    }

    /// Start reading a document, replacing any current session.
    ///
    /// Extraction failures abort before any session state exists.
    pub async fn start(
        &self,
        document: DocumentSource,
        voice: &str,
        speed: f32,
    ) -> Result<(), ReaderError> {
        let _starting = self.starting.lock().await;
        self.retire_current().await;

        let text = match document {
            DocumentSource::Path(path) => {
                tokio::task::spawn_blocking(move || extract::extract_text(&path))
                    .await
                    .map_err(|e| {
                        ExtractionError::Unsupported(format!("extraction task failed: {}", e))
                    })??
            }
            DocumentSource::Text(raw) => extract::prepare_text(&raw)?,
        };

        let segmentation =
            Segmenter::new(self.config.sentences_per_chunk, self.config.chunks_per_batch)
                .segment(&text);
        if segmentation.is_empty() {
            return Err(ExtractionError::Empty.into());
        }

        let id = Uuid::new_v4();
        let store = Arc::new(ArtifactStore::create(&self.config.temp_root(), id)?);
        let params = VoiceParams::new(voice, speed);
        let chunks_total = segmentation.chunks.len();
        let batches_total = segmentation.batches.len();

        let state = Arc::new(StateCell::new());
        let progress = Arc::new(ProgressReporter::new(
            chunks_total,
            batches_total,
            Arc::clone(&state),
            self.events.clone(),
        ));
        let control = Arc::new(PlaybackControl::new(
            state,
            Arc::clone(&self.sink),
            Arc::clone(&progress),
        ));
        control.transition(PlaybackState::Idle, PlaybackState::Loading);

        let (queue_tx, queue_rx) = generation_queue(self.config.queue_capacity);
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (pointer_tx, pointer_rx) = watch::channel(0usize);
        let cancel = CancelFlag::new();
        let teardown = Teardown::new(cancel.clone(), queue_rx.clone(), Arc::clone(&store));

        let workers = worker_count(self.config.workers, self.config.max_workers);
        info!(
            session = %id,
            chunks = chunks_total,
            batches = batches_total,
            workers,
            voice = %params.voice,
            speed = params.speed,
            "Starting reading session"
        );

        let pool = WorkerPool::spawn(
            workers,
            queue_rx,
            WorkerContext {
                engine: Arc::clone(&self.engine),
                params,
                max_retries: self.config.max_retries,
                cancel: cancel.clone(),
                progress: Arc::clone(&progress),
                results: results_tx,
            },
        );
        // Workers exit by themselves once the queue is closed and drained.
        tokio::spawn(pool.join());

        let feeder = tokio::spawn(feed(
            segmentation.chunks,
            queue_tx,
            pointer_rx,
            self.config.lookahead_batches.max(1),
            cancel.clone(),
        ));

        let assembler = tokio::spawn(
            AssemblerTask {
                assembler: BatchAssembler::new(&segmentation.batches),
                results: results_rx,
                outcomes: outcomes_tx,
                store: Arc::clone(&store),
                progress,
                silence: self.config.silence(),
                cancel: cancel.clone(),
            }
            .run(),
        );

        let controller = tokio::spawn(
            Controller::new(
                Arc::clone(&control),
                outcomes_rx,
                pointer_tx,
                store,
                cancel,
                teardown.clone(),
            )
            .run(),
        );

        *self.lock() = Some(Session {
            id,
            control,
            teardown,
            tasks: vec![feeder, assembler],
            controller: Some(controller),
        });
        Ok(())
    }

    /// `Playing -> Paused`; no-op otherwise.
    pub fn pause(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|s| s.control.pause())
            .unwrap_or(false)
    }

    /// `Paused -> Playing`; no-op otherwise.
    pub fn resume(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|s| s.control.resume())
            .unwrap_or(false)
    }

    /// Stop immediately: cancel generation, release artifacts, halt the
    /// sink. The state is `Stopped` when this returns.
    pub fn stop(&self) {
        let previous = match self.lock().as_mut() {
            Some(session) => {
                let previous = session.stop();
                info!(session = %session.id, from = %previous, "Reading stopped");
                previous
            }
            None => {
                let previous = self.idle.stop();
                if previous != PlaybackState::Stopped {
                    let _ = self.events.send(ReaderEvent::StateChange {
                        state: PlaybackState::Stopped,
                    });
                }
                previous
            }
        };
        if previous != PlaybackState::Stopped {
            let _ = self.events.send(ReaderEvent::Stopped {});
        }
    }

    /// Stop and wait for the playback task to let go of the sink.
    pub async fn shutdown(&self) {
        self.stop();
        let controller = self.lock().as_mut().and_then(|s| s.controller.take());
        if let Some(handle) = controller {
            let _ = handle.await;
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.lock()
            .as_ref()
            .map(|s| s.control.state())
            .unwrap_or_else(|| self.idle.load())
    }

    pub fn progress(&self) -> ProgressSnapshot {
        match self.lock().as_ref() {
            Some(session) => session.control.progress().snapshot(),
            None => ProgressSnapshot {
                state: self.idle.load(),
                ..ProgressSnapshot::idle()
            },
        }
    }

    /// Take the current session out of the slot, stop it if still running
    /// and wait until its controller is done with the sink.
    async fn retire_current(&self) {
        let Some(mut session) = self.lock().take() else {
            return;
        };
        if session.control.state().is_terminal() {
            session.teardown.run();
        } else {
            let previous = session.stop();
            debug!(session = %session.id, from = %previous, "Replacing running session");
            let _ = self.events.send(ReaderEvent::Stopped {});
        }
        if let Some(handle) = session.controller.take() {
            let _ = handle.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Some(session) = self.lock().as_mut() {
            session.stop();
        }
    }
}

/// Enqueue chunks in document order, staying at most `lookahead` batches
/// ahead of the playback pointer.
async fn feed(
    chunks: Vec<Chunk>,
    queue: QueueSender,
    mut pointer: watch::Receiver<usize>,
    lookahead: usize,
    cancel: CancelFlag,
) {
    for chunk in chunks {
        let batch = chunk.batch_index;
        if pointer.wait_for(|&p| batch < p + lookahead).await.is_err() {
            return;
        }
        if cancel.is_cancelled() {
            return;
        }
        if queue.push(GenerationTask::new(chunk)).await.is_err() {
            debug!("Generation queue closed, feeder exiting");
            return;
        }
    }
    debug!("All chunks enqueued");
}
