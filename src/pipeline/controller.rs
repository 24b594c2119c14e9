//! Playback controller.
//!
//! A small state machine held in an `AtomicU8` so the controller task and
//! external command handlers can both drive it through compare-and-swap.
//! The controller task plays batches strictly in document order; batches that
//! finish early wait in a reorder buffer until the pointer reaches them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info};

use super::artifacts::ArtifactStore;
use super::progress::{ProgressReporter, ReaderEvent};
use super::session::Teardown;
use super::{BatchOutcome, CancelFlag};
use crate::tts::{AudioSink, PlaybackOutcome};

/// Playback states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PlaybackState {
    /// No session.
    Idle = 0,
    /// Session starting; segmentation and enqueue in progress.
    Loading = 1,
    /// Waiting for the batch under the playback pointer.
    AwaitingBatch = 2,
    Playing = 3,
    Paused = 4,
    Completed = 5,
    /// Stopped on request. Absorbing.
    Stopped = 6,
    /// Generation or playback failed. Only `stop()` leaves it.
    Failed = 7,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Loading,
            2 => Self::AwaitingBatch,
            3 => Self::Playing,
            4 => Self::Paused,
            5 => Self::Completed,
            6 => Self::Stopped,
            7 => Self::Failed,
            _ => Self::Idle,
        }
    }

    /// True once the session can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::AwaitingBatch => write!(f, "awaiting_batch"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Thread-safe playback state, shareable via `Arc`.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(PlaybackState::Idle as u8))
    }

    pub fn load(&self) -> PlaybackState {
        PlaybackState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; fails if the current state is not `from`.
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Force `Stopped`, returning the previous state.
    pub fn stop(&self) -> PlaybackState {
        PlaybackState::from_u8(self.0.swap(PlaybackState::Stopped as u8, Ordering::AcqRel))
    }
}

/// State shared between the controller task and the command surface.
///
/// Every state write goes through `gate`, so a transition's announcement and
/// side effects land before the new state is visible to `state()` readers.
pub struct PlaybackControl {
    state: Arc<StateCell>,
    sink: Arc<dyn AudioSink>,
    progress: Arc<ProgressReporter>,
    resumed: Notify,
    gate: Mutex<()>,
}

impl PlaybackControl {
    pub fn new(
        state: Arc<StateCell>,
        sink: Arc<dyn AudioSink>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            state,
            sink,
            progress,
            resumed: Notify::new(),
            gate: Mutex::new(()),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state.load()
    }

    pub fn progress(&self) -> &Arc<ProgressReporter> {
        &self.progress
    }

    /// Transition that announces itself on success.
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.settle(&[from], to, || {})
    }

    /// Move from any of `from` to `to`. The `StateChange` event goes out,
    /// then `effects` run, then the new state is published.
    fn settle(&self, from: &[PlaybackState], to: PlaybackState, effects: impl FnOnce()) -> bool {
        let _gate = self.lock_gate();
        let current = self.state.load();
        if !from.contains(&current) {
            return false;
        }
        debug!(from = %current, to = %to, "Playback state change");
        self.progress.emit(ReaderEvent::StateChange { state: to });
        effects();
        self.state.transition(current, to)
    }

    /// `Playing -> Paused`. No-op in any other state.
    pub fn pause(&self) -> bool {
        if !self.settle(&[PlaybackState::Playing], PlaybackState::Paused, || {
            self.sink.pause()
        }) {
            debug!(state = %self.state(), "Pause ignored");
            return false;
        }
        info!("Playback paused");
        true
    }

    /// `Paused -> Playing`. No-op in any other state.
    pub fn resume(&self) -> bool {
        if !self.settle(&[PlaybackState::Paused], PlaybackState::Playing, || {
            self.sink.resume()
        }) {
            debug!(state = %self.state(), "Resume ignored");
            return false;
        }
        self.resumed.notify_one();
        info!("Playback resumed");
        true
    }

    /// Force `Stopped`, reset the playback pointer and halt the sink.
    /// Returns the previous state.
    pub fn stop(&self) -> PlaybackState {
        let previous = {
            let _gate = self.lock_gate();
            if self.state.load() != PlaybackState::Stopped {
                self.progress.emit(ReaderEvent::StateChange {
                    state: PlaybackState::Stopped,
                });
            }
            self.progress.set_current_batch(0);
            self.state.stop()
        };
        self.sink.stop();
        // Wake a controller parked on a pause so it can observe the stop.
        self.resumed.notify_one();
        previous
    }

    /// Point progress at `index` unless the session already ended.
    fn point_at(&self, index: usize) -> bool {
        let _gate = self.lock_gate();
        if self.state.load().is_terminal() {
            return false;
        }
        self.progress.set_current_batch(index);
        true
    }

    /// Park while paused. Returns false if the session left the
    /// Playing/Paused pair (stopped) while waiting.
    async fn wait_while_paused(&self) -> bool {
        loop {
            let notified = self.resumed.notified();
            match self.state.load() {
                PlaybackState::Paused => notified.await,
                PlaybackState::Playing => return true,
                _ => return false,
            }
        }
    }

    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The per-session controller task.
pub struct Controller {
    control: Arc<PlaybackControl>,
    outcomes: mpsc::UnboundedReceiver<BatchOutcome>,
    pointer: watch::Sender<usize>,
    store: Arc<ArtifactStore>,
    cancel: CancelFlag,
    teardown: Teardown,
}

impl Controller {
    pub fn new(
        control: Arc<PlaybackControl>,
        outcomes: mpsc::UnboundedReceiver<BatchOutcome>,
        pointer: watch::Sender<usize>,
        store: Arc<ArtifactStore>,
        cancel: CancelFlag,
        teardown: Teardown,
    ) -> Self {
        Self {
            control,
            outcomes,
            pointer,
            store,
            cancel,
            teardown,
        }
    }

    pub async fn run(mut self) {
        let batches_total = self.control.progress.batches_total();
        let mut reorder: BTreeMap<usize, BatchOutcome> = BTreeMap::new();

        for index in 0..batches_total {
            if !self.control.point_at(index) {
                return;
            }
            let _ = self.pointer.send(index);

            if !self.enter_awaiting().await {
                debug!(batch = index, "Controller exiting before batch");
                return;
            }

            let outcome = loop {
                if let Some(outcome) = reorder.remove(&index) {
                    break outcome;
                }
                match self.outcomes.recv().await {
                    Some(outcome) if outcome.index() < index => {
                        debug!(batch = outcome.index(), "Discarding outcome for played batch");
                    }
                    Some(outcome) => {
                        reorder.insert(outcome.index(), outcome);
                    }
                    None => {
                        if !self.cancel.is_cancelled() {
                            self.fail(index, "batch pipeline closed unexpectedly".into());
                        }
                        return;
                    }
                }
            };

            let batch = match outcome {
                BatchOutcome::Ready(batch) => batch,
                BatchOutcome::Failed { index, reason } => {
                    self.fail(index, reason);
                    return;
                }
            };

            if !self
                .control
                .transition(PlaybackState::AwaitingBatch, PlaybackState::Playing)
            {
                return;
            }
            info!(
                batch = index,
                of = batches_total,
                duration_secs = format!("{:.2}", batch.audio.duration().as_secs_f64()),
                "Playing batch"
            );
            self.control.progress.emit(ReaderEvent::BatchStarted {
                batch_index: index,
                batches_total,
            });

            let sink = Arc::clone(&self.control.sink);
            let cancel = self.cancel.clone();
            let audio = batch.audio.clone();
            let played = tokio::task::spawn_blocking(move || sink.play(&audio, &cancel)).await;

            match played {
                Ok(Ok(PlaybackOutcome::Finished)) => {}
                Ok(Ok(PlaybackOutcome::Stopped)) => {
                    if self.cancel.is_cancelled() || self.control.state() == PlaybackState::Stopped {
                        debug!(batch = index, "Playback interrupted");
                    } else {
                        self.fail(index, "playback interrupted by the audio output".into());
                    }
                    return;
                }
                Ok(Err(e)) => {
                    self.fail(index, e.to_string());
                    return;
                }
                Err(e) => {
                    self.fail(index, format!("playback task failed: {}", e));
                    return;
                }
            }

            self.store.release_batch(index, &batch.chunk_indices);
            self.control
                .progress
                .emit(ReaderEvent::BatchFinished { batch_index: index });
        }

        self.complete(batches_total).await;
    }

    async fn enter_awaiting(&self) -> bool {
        self.control
            .transition(PlaybackState::Loading, PlaybackState::AwaitingBatch)
            || self.leave_playing(PlaybackState::AwaitingBatch).await
    }

    /// `Playing -> to`, first waiting out a pause that slipped in after the
    /// batch ended.
    async fn leave_playing(&self, to: PlaybackState) -> bool {
        loop {
            if self.control.transition(PlaybackState::Playing, to) {
                return true;
            }
            if !self.control.wait_while_paused().await {
                return false;
            }
        }
    }

    /// Every batch played: release what is left, then publish `Completed`.
    async fn complete(&self, batches_total: usize) {
        loop {
            let done = self.control.settle(
                &[PlaybackState::Loading, PlaybackState::Playing],
                PlaybackState::Completed,
                || {
                    self.teardown.run();
                    info!(batches = batches_total, "Reading completed");
                    self.control.progress.emit(ReaderEvent::Completed {});
                },
            );
            if done || !self.control.wait_while_paused().await {
                return;
            }
        }
    }

    fn fail(&self, batch_index: usize, reason: String) {
        self.control.settle(
            &[
                PlaybackState::AwaitingBatch,
                PlaybackState::Playing,
                PlaybackState::Paused,
            ],
            PlaybackState::Failed,
            || {
                error!(batch = batch_index, reason = %reason, "Reading failed");
                self.teardown.run();
                self.control
                    .progress
                    .emit(ReaderEvent::Failed { batch_index, reason });
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::generation_queue;
    use crate::pipeline::testing::MemorySink;
    use crate::pipeline::{AudioBuffer, StitchedBatch};
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Harness {
        control: Arc<PlaybackControl>,
        sink: Arc<MemorySink>,
        store: Arc<ArtifactStore>,
        outcomes: mpsc::UnboundedSender<BatchOutcome>,
        events: broadcast::Receiver<ReaderEvent>,
        handle: tokio::task::JoinHandle<()>,
        _dir: std::path::PathBuf,
    }

    /// Everything a controller needs, with the controller not yet running.
    struct Parts {
        control: Arc<PlaybackControl>,
        sink: Arc<MemorySink>,
        store: Arc<ArtifactStore>,
        outcomes: mpsc::UnboundedSender<BatchOutcome>,
        events: broadcast::Receiver<ReaderEvent>,
        controller: Controller,
        dir: std::path::PathBuf,
    }

    impl Parts {
        fn spawn(self) -> Harness {
            Harness {
                control: self.control,
                sink: self.sink,
                store: self.store,
                outcomes: self.outcomes,
                events: self.events,
                handle: tokio::spawn(self.controller.run()),
                _dir: self.dir,
            }
        }
    }

    fn parts(batches: usize, sink: MemorySink) -> Parts {
        let dir = std::env::temp_dir().join(format!("narrator-ctl-{}", uuid::Uuid::new_v4()));
        let store = Arc::new(ArtifactStore::create(&dir, uuid::Uuid::new_v4()).unwrap());
        let (events_tx, events) = broadcast::channel(256);
        let state = Arc::new(StateCell::new());
        let progress = Arc::new(ProgressReporter::new(batches, batches, Arc::clone(&state), events_tx));
        let sink = Arc::new(sink);
        let control = Arc::new(PlaybackControl::new(
            Arc::clone(&state),
            Arc::clone(&sink) as Arc<dyn AudioSink>,
            progress,
        ));
        assert!(state.transition(PlaybackState::Idle, PlaybackState::Loading));

        let (tx, rx) = mpsc::unbounded_channel();
        let (pointer, _) = watch::channel(0);
        let cancel = CancelFlag::new();
        let (_queue_tx, queue) = generation_queue(1);
        let teardown = Teardown::new(cancel.clone(), queue, Arc::clone(&store));
        let controller = Controller::new(
            Arc::clone(&control),
            rx,
            pointer,
            Arc::clone(&store),
            cancel,
            teardown,
        );
        Parts {
            control,
            sink,
            store,
            outcomes: tx,
            events,
            controller,
            dir,
        }
    }

    fn harness(batches: usize, sink: MemorySink) -> Harness {
        parts(batches, sink).spawn()
    }

    async fn wait_until(control: &PlaybackControl, done: impl Fn(PlaybackState) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !done(control.state()) {
            assert!(tokio::time::Instant::now() < deadline, "stuck in {}", control.state());
            tokio::task::yield_now().await;
        }
    }

    fn drain(events: &mut broadcast::Receiver<ReaderEvent>) -> Vec<ReaderEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn ready(index: usize, value: f32, len: usize) -> BatchOutcome {
        BatchOutcome::Ready(StitchedBatch {
            index,
            chunk_indices: vec![index],
            audio: AudioBuffer::new(vec![value; len], 24_000),
        })
    }

    #[test]
    fn test_state_roundtrip_and_display() {
        for v in 0..8u8 {
            assert_eq!(PlaybackState::from_u8(v) as u8, v);
        }
        assert_eq!(PlaybackState::from_u8(200), PlaybackState::Idle);
        assert_eq!(PlaybackState::AwaitingBatch.to_string(), "awaiting_batch");
        assert!(PlaybackState::Failed.is_terminal());
        assert!(!PlaybackState::Paused.is_terminal());
    }

    #[test]
    fn test_state_cell_cas_and_stop() {
        let cell = StateCell::new();
        assert_eq!(cell.load(), PlaybackState::Idle);
        assert!(!cell.transition(PlaybackState::Playing, PlaybackState::Paused));
        assert!(cell.transition(PlaybackState::Idle, PlaybackState::Loading));
        assert_eq!(cell.stop(), PlaybackState::Loading);
        assert_eq!(cell.stop(), PlaybackState::Stopped);
        assert!(!cell.transition(PlaybackState::Loading, PlaybackState::AwaitingBatch));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_plays_in_order_regardless_of_arrival() {
        let mut h = harness(3, MemorySink::fast());
        h.outcomes.send(ready(2, 0.3, 100)).unwrap();
        h.outcomes.send(ready(1, 0.2, 100)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.control.state(), PlaybackState::AwaitingBatch);
        assert!(h.sink.played().is_empty());

        h.outcomes.send(ready(0, 0.1, 100)).unwrap();
        tokio::time::timeout(Duration::from_secs(5), &mut h.handle)
            .await
            .unwrap()
            .unwrap();

        let played = h.sink.played();
        assert_eq!(played.len(), 300);
        assert!(played[..100].iter().all(|&s| s == 0.1));
        assert!(played[100..200].iter().all(|&s| s == 0.2));
        assert!(played[200..].iter().all(|&s| s == 0.3));
        assert_eq!(h.control.state(), PlaybackState::Completed);
        assert_eq!(h.sink.overlapping_plays(), 0);
        assert_eq!(h.store.live_count(), 0);

        let mut saw_completed = false;
        while let Ok(event) = h.events.try_recv() {
            if matches!(event, ReaderEvent::Completed {}) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_batch_halts_after_prior_batches() {
        let mut h = harness(3, MemorySink::fast());
        h.outcomes.send(ready(0, 0.5, 64)).unwrap();
        h.outcomes
            .send(BatchOutcome::Failed {
                index: 1,
                reason: "engine down".into(),
            })
            .unwrap();
        h.outcomes.send(ready(2, 0.9, 64)).unwrap();
        tokio::time::timeout(Duration::from_secs(5), &mut h.handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.control.state(), PlaybackState::Failed);
        assert_eq!(h.sink.played(), vec![0.5; 64]);
        assert!(!h.control.pause());
        assert!(!h.control.resume());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pause_resume_are_idempotent() {
        let h = harness(1, MemorySink::new(Duration::from_millis(2)));
        assert!(!h.control.pause());
        h.outcomes.send(ready(0, 0.25, 64 * 40)).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while h.control.state() != PlaybackState::Playing && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!h.control.resume());
        assert!(h.control.pause());
        assert!(!h.control.pause());
        assert_eq!(h.control.state(), PlaybackState::Paused);

        let frozen = h.sink.played().len();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(h.sink.played().len() <= frozen + 64);

        assert!(h.control.resume());
        assert!(!h.control.resume());
        tokio::time::timeout(Duration::from_secs(5), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.sink.played(), vec![0.25; 64 * 40]);
        assert_eq!(h.control.state(), PlaybackState::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_while_awaiting() {
        let h = harness(2, MemorySink::fast());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.control.stop(), PlaybackState::AwaitingBatch);
        drop(h.outcomes);
        tokio::time::timeout(Duration::from_secs(2), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.control.state(), PlaybackState::Stopped);
        assert!(h.sink.played().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_while_loading() {
        let mut p = parts(2, MemorySink::fast());
        assert_eq!(p.control.stop(), PlaybackState::Loading);
        assert_eq!(p.control.state(), PlaybackState::Stopped);
        assert_eq!(p.control.stop(), PlaybackState::Stopped);
        assert_eq!(
            drain(&mut p.events),
            vec![ReaderEvent::StateChange {
                state: PlaybackState::Stopped
            }]
        );

        let h = p.spawn();
        tokio::time::timeout(Duration::from_secs(2), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.control.state(), PlaybackState::Stopped);
        assert!(h.sink.played().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_resets_pointer() {
        let h = harness(3, MemorySink::new(Duration::from_millis(2)));
        h.outcomes.send(ready(0, 0.1, 64)).unwrap();
        h.outcomes.send(ready(1, 0.2, 64 * 100)).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while h.control.progress().snapshot().current_batch < 1 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        h.control.stop();
        assert_eq!(h.control.progress().snapshot().current_batch, 0);

        tokio::time::timeout(Duration::from_secs(2), h.handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.control.state(), PlaybackState::Stopped);
        assert_eq!(h.control.progress().snapshot().current_batch, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_terminal_state_published_after_teardown() {
        let mut h = harness(1, MemorySink::fast());
        h.store.write_chunk(9, &AudioBuffer::new(vec![0.1; 64], 24_000)).unwrap();
        h.outcomes.send(ready(0, 0.1, 64)).unwrap();
        wait_until(&h.control, PlaybackState::is_terminal).await;
        assert_eq!(h.control.state(), PlaybackState::Completed);
        assert_eq!(h.store.live_count(), 0);
        assert!(drain(&mut h.events).contains(&ReaderEvent::Completed {}));

        let mut h = harness(2, MemorySink::fast());
        h.outcomes.send(ready(0, 0.1, 64)).unwrap();
        h.store.write_batch(1, &AudioBuffer::new(vec![0.1; 64], 24_000)).unwrap();
        h.outcomes
            .send(BatchOutcome::Failed {
                index: 1,
                reason: "engine down".into(),
            })
            .unwrap();
        wait_until(&h.control, PlaybackState::is_terminal).await;
        assert_eq!(h.control.state(), PlaybackState::Failed);
        assert_eq!(h.store.live_count(), 0);
        assert!(drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, ReaderEvent::Failed { batch_index: 1, .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_outside_sink_stop_fails_session() {
        let mut h = harness(2, MemorySink::new(Duration::from_millis(2)));
        h.outcomes.send(ready(0, 0.1, 64 * 100)).unwrap();
        wait_until(&h.control, |s| s == PlaybackState::Playing).await;
        while h.sink.played().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Someone else halts the shared output; the session was never stopped.
        h.sink.stop();
        tokio::time::timeout(Duration::from_secs(2), &mut h.handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.control.state(), PlaybackState::Failed);
        assert!(drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, ReaderEvent::Failed { batch_index: 0, .. })));
    }
}
