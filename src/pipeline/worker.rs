//! Fixed-size worker pool.
//!
//! Each worker pulls one task at a time from the shared generation queue,
//! calls the TTS engine (retrying failed attempts immediately) and sends
//! exactly one terminal `ChunkResult` downstream. Results that finish after
//! the session was cancelled are dropped on arrival.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::progress::ProgressReporter;
use super::queue::QueueReceiver;
use super::{CancelFlag, ChunkOutcome, ChunkResult, GenerationTask, VoiceParams};
use crate::tts::TtsEngine;

/// Default retry budget per chunk (attempts = retries + 1).
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Default upper bound on pool size.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Pool size: the configured value, or the detected usable parallelism,
/// clamped to `[1, ceiling]`.
pub fn worker_count(configured: Option<usize>, ceiling: usize) -> usize {
    let wanted = configured.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    wanted.clamp(1, ceiling.max(1))
}

/// Everything a worker needs, shared by the whole pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub engine: Arc<dyn TtsEngine>,
    pub params: VoiceParams,
    pub max_retries: u32,
    pub cancel: CancelFlag,
    pub progress: Arc<ProgressReporter>,
    pub results: mpsc::UnboundedSender<ChunkResult>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers draining `queue`.
    pub fn spawn(size: usize, queue: QueueReceiver, ctx: WorkerContext) -> Self {
        let size = size.max(1);
        info!(workers = size, engine = %ctx.engine.name(), "Starting worker pool");
        let handles = (0..size)
            .map(|id| {
                let queue = queue.clone();
                let ctx = ctx.clone();
                tokio::spawn(run_worker(id, queue, ctx))
            })
            .collect();
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit (queue closed and drained).
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!("Worker panicked: {}", e);
                }
            }
        }
    }
}

async fn run_worker(id: usize, queue: QueueReceiver, ctx: WorkerContext) {
    while let Some(task) = queue.pop().await {
        if ctx.cancel.is_cancelled() {
            debug!(worker = id, chunk = task.chunk.index, "Session cancelled, skipping task");
            continue;
        }

        let result = generate(&ctx, task).await;

        if ctx.cancel.is_cancelled() {
            debug!(worker = id, chunk = result.chunk_index, "Discarding late result");
            continue;
        }

        match &result.outcome {
            ChunkOutcome::Success(_) => {
                ctx.progress
                    .chunk_succeeded(result.chunk_index, result.batch_index);
            }
            ChunkOutcome::Failure(reason) => {
                ctx.progress
                    .chunk_failed(result.chunk_index, result.batch_index, reason);
            }
        }

        if ctx.results.send(result).is_err() {
            debug!(worker = id, "Result channel closed, worker exiting");
            break;
        }
    }
    debug!(worker = id, "Worker exiting");
}

/// Run one task to a terminal result, retrying up to `max_retries` times.
pub async fn generate(ctx: &WorkerContext, mut task: GenerationTask) -> ChunkResult {
    let chunk_index = task.chunk.index;
    let batch_index = task.chunk.batch_index;

    let outcome = loop {
        task.attempt_count += 1;
        let error = match ctx.engine.synthesize(&task.chunk.text, &ctx.params).await {
            Ok(audio) if !audio.is_empty() => {
                debug!(
                    chunk = chunk_index,
                    attempt = task.attempt_count,
                    samples = audio.len(),
                    duration_secs = format!("{:.2}", audio.duration().as_secs_f64()),
                    "Chunk synthesized"
                );
                break ChunkOutcome::Success(audio);
            }
            Ok(_) => "engine produced no audio".to_string(),
            Err(e) => e.to_string(),
        };

        if task.attempt_count > ctx.max_retries || ctx.cancel.is_cancelled() {
            warn!(chunk = chunk_index, attempts = task.attempt_count, error = %error, "Chunk generation failed");
            break ChunkOutcome::Failure(error);
        }
        warn!(chunk = chunk_index, attempt = task.attempt_count, error = %error, "Chunk generation failed, retrying");
    };

    ChunkResult {
        chunk_index,
        batch_index,
        outcome,
    }
}
