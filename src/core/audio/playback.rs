//! Client-side playback scheduling.
//!
//! [`PlaybackScheduler`] queues audio deltas and hands them one at a time to an
//! [`AudioSink`], starting the next clip as soon as the current one completes.
//! [`PlaybackScheduler::cancel_all`] fades the active clip out over a short
//! ramp before stopping it and discarding everything queued.
//!
//! The scheduler runs as a single task that owns the sink. Handles talk to it
//! through a bounded command channel, so enqueue calls made during a cancel
//! ramp are only processed after the ramp and its cleanup have finished.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::pcm::{self, PCM_SAMPLE_RATE, PcmBuffer};

/// Command channel depth between handles and the scheduler task.
const COMMAND_BUFFER_SIZE: usize = 256;

/// Errors returned by scheduler handles.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Playback scheduler has shut down")]
    Closed,
}

/// Destination for decoded clips.
///
/// Implementations wrap whatever actually renders audio. At most one clip is
/// started at a time.
pub trait AudioSink: Send + 'static {
    /// Begin rendering `clip`. The receiver resolves when the clip ends on its own.
    fn start(&mut self, clip: PcmBuffer) -> oneshot::Receiver<()>;

    /// Set output gain in `[0.0, 1.0]`.
    fn set_gain(&mut self, gain: f32);

    /// Stop and release the active clip, if any.
    fn stop(&mut self);
}

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Fade-out duration used by `cancel_all`.
    pub ramp: Duration,
    /// Number of gain steps in the fade-out.
    pub ramp_steps: u32,
    /// Queued clips kept before the oldest is dropped.
    pub max_queued: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: PCM_SAMPLE_RATE,
            channels: 1,
            ramp: Duration::from_millis(50),
            ramp_steps: 5,
            max_queued: 512,
        }
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub queued: usize,
    pub playing: bool,
    pub clips_started: u64,
    pub clips_completed: u64,
    pub clips_dropped: u64,
}

enum Command {
    Enqueue(Bytes),
    CancelAll(oneshot::Sender<()>),
}

/// Handle to a running playback task. Cloning shares the same queue.
#[derive(Clone)]
pub struct PlaybackScheduler {
    tx: mpsc::Sender<Command>,
    status: Arc<Mutex<PlaybackStatus>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PlaybackScheduler {
    /// Spawn the scheduler task on the current runtime.
    pub fn spawn<S: AudioSink>(sink: S, config: PlaybackConfig) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let status = Arc::new(Mutex::new(PlaybackStatus::default()));
        let worker = Worker {
            sink,
            config,
            queue: VecDeque::new(),
            current: None,
            status: status.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));

        Self {
            tx,
            status,
            task: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queue a PCM16 delta for playback.
    pub async fn enqueue(&self, delta: Bytes) -> Result<(), PlaybackError> {
        self.tx
            .send(Command::Enqueue(delta))
            .await
            .map_err(|_| PlaybackError::Closed)
    }

    /// Fade out and stop the active clip, then drop everything queued.
    ///
    /// Returns once the ramp and cleanup are complete. Safe to call when idle.
    pub async fn cancel_all(&self) -> Result<(), PlaybackError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::CancelAll(ack_tx))
            .await
            .map_err(|_| PlaybackError::Closed)?;
        ack_rx.await.map_err(|_| PlaybackError::Closed)
    }

    pub fn status(&self) -> PlaybackStatus {
        *self.status.lock()
    }

    /// Stop the scheduler task and release the sink.
    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

struct Worker<S: AudioSink> {
    sink: S,
    config: PlaybackConfig,
    queue: VecDeque<Bytes>,
    current: Option<oneshot::Receiver<()>>,
    status: Arc<Mutex<PlaybackStatus>>,
}

impl<S: AudioSink> Worker<S> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Enqueue(delta)) => self.push(delta),
                    Some(Command::CancelAll(ack)) => {
                        self.cancel_all().await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
                _ = wait_for_clip(&mut self.current), if self.current.is_some() => {
                    self.current = None;
                    self.status.lock().clips_completed += 1;
                    self.start_next();
                }
            }
            self.publish();
        }

        if self.current.take().is_some() {
            self.sink.stop();
        }
        self.queue.clear();
        self.publish();
        debug!("Playback scheduler stopped");
    }

    fn push(&mut self, delta: Bytes) {
        let delta = Bytes::copy_from_slice(pcm::truncate_to_even(&delta));
        if delta.is_empty() {
            return;
        }
        if self.queue.len() >= self.config.max_queued.max(1) {
            self.queue.pop_front();
            self.status.lock().clips_dropped += 1;
            warn!("Playback queue full, dropping oldest clip");
        }
        self.queue.push_back(delta);
        if self.current.is_none() {
            self.start_next();
        }
    }

    fn start_next(&mut self) {
        let Some(delta) = self.queue.pop_front() else {
            return;
        };
        let clip = pcm::decode_buffer(&delta, self.config.sample_rate, self.config.channels);
        self.current = Some(self.sink.start(clip));
        self.status.lock().clips_started += 1;
    }

    async fn cancel_all(&mut self) {
        if self.current.is_some() {
            let steps = self.config.ramp_steps.max(1);
            let step = self.config.ramp / steps;
            for i in 1..=steps {
                self.sink.set_gain(1.0 - i as f32 / steps as f32);
                tokio::time::sleep(step).await;
            }
            self.sink.stop();
            self.current = None;
        }
        self.sink.set_gain(1.0);
        let dropped = self.queue.len();
        self.queue.clear();
        debug!(dropped, "Playback cancelled");
    }

    fn publish(&self) {
        let mut status = self.status.lock();
        status.queued = self.queue.len();
        status.playing = self.current.is_some();
    }
}

async fn wait_for_clip(current: &mut Option<oneshot::Receiver<()>>) {
    match current {
        Some(done) => {
            let _ = done.await;
        }
        None => std::future::pending::<()>().await,
    }
}
