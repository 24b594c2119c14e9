//! Batch assembler.
//!
//! Collects chunk results as they arrive (in any order) and decides, per
//! batch, when it is Ready or Failed. The assembler task is the sole owner of
//! the per-batch maps, so that decision needs no locking.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::artifacts::ArtifactStore;
use super::progress::ProgressReporter;
use super::stitch::stitch;
use super::{
    AudioBuffer, BatchOutcome, BatchPlan, BatchState, CancelFlag, ChunkOutcome, ChunkResult,
    StitchedBatch,
};
use crate::error::ResourceError;

/// What recording one result did to its batch.
#[derive(Debug)]
pub enum Assembly {
    /// The batch still waits for chunks.
    Pending,
    /// Every chunk succeeded; buffers are in document order.
    Ready {
        batch_index: usize,
        chunk_indices: Vec<usize>,
        buffers: Vec<AudioBuffer>,
    },
    /// A chunk failed; the batch will never become Ready.
    Failed {
        batch_index: usize,
        chunk_index: usize,
        reason: String,
    },
    /// Duplicate, unknown, or for a batch already decided.
    Discarded,
}

#[derive(Debug)]
struct BatchSlot {
    plan: BatchPlan,
    audio: HashMap<usize, AudioBuffer>,
    state: BatchState,
}

#[derive(Debug)]
pub struct BatchAssembler {
    slots: Vec<BatchSlot>,
}

impl BatchAssembler {
    pub fn new(plans: &[BatchPlan]) -> Self {
        let slots = plans
            .iter()
            .map(|plan| BatchSlot {
                plan: plan.clone(),
                audio: HashMap::with_capacity(plan.chunk_indices.len()),
                state: BatchState::Pending,
            })
            .collect();
        Self { slots }
    }

    pub fn state(&self, batch_index: usize) -> Option<BatchState> {
        self.slots.get(batch_index).map(|slot| slot.state)
    }

    /// Whether a result for this chunk would still be used.
    pub fn wants(&self, batch_index: usize, chunk_index: usize) -> bool {
        self.slots.get(batch_index).is_some_and(|slot| {
            slot.state == BatchState::Pending
                && slot.plan.chunk_indices.contains(&chunk_index)
                && !slot.audio.contains_key(&chunk_index)
        })
    }

    pub fn record(&mut self, result: ChunkResult) -> Assembly {
        let Some(slot) = self.slots.get_mut(result.batch_index) else {
            warn!(batch = result.batch_index, chunk = result.chunk_index, "Result for unknown batch");
            return Assembly::Discarded;
        };
        if !slot.plan.chunk_indices.contains(&result.chunk_index) {
            warn!(batch = result.batch_index, chunk = result.chunk_index, "Result for chunk outside its batch");
            return Assembly::Discarded;
        }
        if slot.state != BatchState::Pending {
            debug!(batch = result.batch_index, chunk = result.chunk_index, state = ?slot.state, "Result for decided batch dropped");
            return Assembly::Discarded;
        }
        if slot.audio.contains_key(&result.chunk_index) {
            warn!(batch = result.batch_index, chunk = result.chunk_index, "Duplicate chunk result");
            return Assembly::Discarded;
        }

        match result.outcome {
            ChunkOutcome::Failure(reason) => {
                slot.state = BatchState::Failed;
                slot.audio.clear();
                Assembly::Failed {
                    batch_index: result.batch_index,
                    chunk_index: result.chunk_index,
                    reason,
                }
            }
            ChunkOutcome::Success(audio) => {
                slot.audio.insert(result.chunk_index, audio);
                if slot.audio.len() < slot.plan.chunk_indices.len() {
                    return Assembly::Pending;
                }
                slot.state = BatchState::Ready;
                let buffers = slot
                    .plan
                    .chunk_indices
                    .iter()
                    .filter_map(|i| slot.audio.remove(i))
                    .collect();
                Assembly::Ready {
                    batch_index: result.batch_index,
                    chunk_indices: slot.plan.chunk_indices.clone(),
                    buffers,
                }
            }
        }
    }
}

/// Drives a `BatchAssembler` from the worker result channel and hands
/// decided batches to the controller.
pub struct AssemblerTask {
    pub assembler: BatchAssembler,
    pub results: mpsc::UnboundedReceiver<ChunkResult>,
    pub outcomes: mpsc::UnboundedSender<BatchOutcome>,
    pub store: Arc<ArtifactStore>,
    pub progress: Arc<ProgressReporter>,
    pub silence: Duration,
    pub cancel: CancelFlag,
}

impl AssemblerTask {
    pub async fn run(mut self) {
        while let Some(result) = self.results.recv().await {
            if self.cancel.is_cancelled() {
                break;
            }

            if let ChunkOutcome::Success(audio) = &result.outcome {
                if self.assembler.wants(result.batch_index, result.chunk_index) {
                    let (index, audio) = (result.chunk_index, audio.clone());
                    if let Err(e) = self.persist(move |store| store.write_chunk(index, &audio)).await {
                        warn!(chunk = index, error = %e, "Chunk artifact not written");
                    }
                }
            }

            let outcome = match self.assembler.record(result) {
                Assembly::Pending | Assembly::Discarded => continue,
                Assembly::Failed {
                    batch_index,
                    chunk_index,
                    reason,
                } => {
                    let reason = format!("chunk {} failed: {}", chunk_index, reason);
                    warn!(batch = batch_index, reason = %reason, "Batch failed");
                    self.progress.batch_failed(batch_index, &reason);
                    BatchOutcome::Failed {
                        index: batch_index,
                        reason,
                    }
                }
                Assembly::Ready {
                    batch_index,
                    chunk_indices,
                    buffers,
                } => self.finish(batch_index, chunk_indices, &buffers).await,
            };

            if self.outcomes.send(outcome).is_err() {
                debug!("Controller gone, assembler exiting");
                break;
            }
        }
        debug!("Assembler exiting");
    }

    /// Run an artifact write on the blocking pool.
    async fn persist<F>(&self, write: F) -> Result<PathBuf, String>
    where
        F: FnOnce(&ArtifactStore) -> Result<PathBuf, ResourceError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || write(store.as_ref())).await {
            Ok(written) => written.map_err(|e| e.to_string()),
            Err(e) => Err(format!("artifact write task failed: {}", e)),
        }
    }

    async fn finish(
        &self,
        batch_index: usize,
        chunk_indices: Vec<usize>,
        buffers: &[AudioBuffer],
    ) -> BatchOutcome {
        match stitch(buffers, self.silence) {
            Ok(audio) => {
                let stitched = audio.clone();
                if let Err(e) = self
                    .persist(move |store| store.write_batch(batch_index, &stitched))
                    .await
                {
                    warn!(batch = batch_index, error = %e, "Batch artifact not written");
                }
                info!(
                    batch = batch_index,
                    chunks = chunk_indices.len(),
                    duration_secs = format!("{:.2}", audio.duration().as_secs_f64()),
                    "Batch ready"
                );
                self.progress.batch_ready(batch_index);
                BatchOutcome::Ready(StitchedBatch {
                    index: batch_index,
                    chunk_indices,
                    audio,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(batch = batch_index, reason = %reason, "Batch could not be stitched");
                self.progress.batch_failed(batch_index, &reason);
                BatchOutcome::Failed {
                    index: batch_index,
                    reason,
                }
            }
        }
    }
}
