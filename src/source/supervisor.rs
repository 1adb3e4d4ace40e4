//! Encoder process supervision
//!
//! The supervisor owns the child process and its stdout. It runs as a single
//! task driving an explicit state machine:
//!
//! ```text
//!            spawn ok                 EOF / exit / bad framing
//! Spawning ───────────► Streaming ─────────────────────────► Restarting ──► Spawning
//!    ▲                     │
//!    │                     │ slot still full, no demand (PauseOnIdle)
//!    │                     ▼
//!    └──── frame taken ── Paused
//!
//! any state ── FrameChannel dropped ──► Stopped
//! ```
//!
//! There is no retry limit: whatever ends a session, a new process is started.
//!
//! Demand is the consumer count last reported through
//! [`FrameChannel::set_demand`]. A full slot with demand only means the
//! reader is one frame behind, so the frame is dropped instead of pausing.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use crate::error::{Error, Result};
use crate::media::{jpeg, FramingError, JpegDelimiter};
use crate::stats::{SourceCounters, SourceStats};

use super::config::{DeliveryPolicy, SourceConfig};
use super::frame::DecodedFrame;

/// Minimum wait before retrying a failed spawn
const SPAWN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Start the encoder and return the channel its decoded frames arrive on
///
/// Fails only if the first spawn fails (for example, the program is not
/// installed). Later failures are handled by restarting. Must be called from
/// within a Tokio runtime.
pub fn open(config: SourceConfig) -> Result<FrameChannel> {
    let (tx, rx) = mpsc::channel(1);
    let (demand, demand_rx) = watch::channel(0);
    let counters = Arc::new(SourceCounters::default());

    let mut supervisor = Supervisor {
        config,
        tx,
        demand: demand_rx,
        counters: Arc::clone(&counters),
        sequence: 0,
    };
    let child = supervisor.spawn()?;
    let task = tokio::spawn(supervisor.run(child));

    Ok(FrameChannel {
        rx,
        demand,
        monitor: SourceMonitor { counters },
        task: Some(task),
    })
}

/// Receiving end of a frame source
///
/// Holds at most one undelivered frame. Dropping it stops the supervisor and
/// kills the encoder.
pub struct FrameChannel {
    rx: mpsc::Receiver<DecodedFrame>,
    demand: watch::Sender<usize>,
    monitor: SourceMonitor,
    task: Option<JoinHandle<()>>,
}

impl FrameChannel {
    /// Wrap a receiver fed by something other than an encoder process
    pub fn from_receiver(rx: mpsc::Receiver<DecodedFrame>) -> Self {
        let (demand, _) = watch::channel(0);
        Self {
            rx,
            demand,
            monitor: SourceMonitor {
                counters: Arc::new(SourceCounters::default()),
            },
            task: None,
        }
    }

    /// Wait for the next frame; `None` once the source has stopped
    pub async fn recv(&mut self) -> Option<DecodedFrame> {
        self.rx.recv().await
    }

    /// Report how many consumers currently want frames
    ///
    /// Starts at zero. Under `PauseOnIdle` the encoder is only paused while
    /// this is zero.
    pub fn set_demand(&self, consumers: usize) {
        self.demand.send_replace(consumers);
    }

    /// Get a handle for reading source statistics
    pub fn monitor(&self) -> SourceMonitor {
        self.monitor.clone()
    }

    /// Current source statistics
    pub fn stats(&self) -> SourceStats {
        self.monitor.stats()
    }
}

/// Cloneable read-only view of a source's counters
#[derive(Clone)]
pub struct SourceMonitor {
    counters: Arc<SourceCounters>,
}

impl SourceMonitor {
    /// Snapshot the counters
    pub fn stats(&self) -> SourceStats {
        self.counters.snapshot()
    }
}

/// Why a read session ended
#[derive(Debug)]
enum SessionEnd {
    /// stdout reached EOF
    Exited,
    /// The stream could not be delimited
    Framing(FramingError),
    /// The previous frame was never taken (PauseOnIdle only)
    Idle(DecodedFrame),
    /// The FrameChannel was dropped
    Closed,
}

#[derive(Debug)]
enum State {
    Spawning,
    Streaming(Child),
    Restarting,
    Paused(DecodedFrame),
    Stopped,
}

struct Supervisor {
    config: SourceConfig,
    tx: mpsc::Sender<DecodedFrame>,
    demand: watch::Receiver<usize>,
    counters: Arc<SourceCounters>,
    sequence: u64,
}

impl Supervisor {
    async fn run(mut self, first: Child) {
        let mut state = State::Streaming(first);

        loop {
            state = match state {
                State::Spawning => {
                    if self.tx.is_closed() {
                        State::Stopped
                    } else {
                        match self.spawn() {
                            Ok(child) => State::Streaming(child),
                            Err(e) => {
                                tracing::error!(error = %e, "Encoder spawn failed, retrying");
                                let delay = self.config.restart_delay.max(SPAWN_RETRY_DELAY);
                                if self.wait(delay).await {
                                    State::Spawning
                                } else {
                                    State::Stopped
                                }
                            }
                        }
                    }
                }
                State::Streaming(mut child) => {
                    let end = self.stream(&mut child).await;
                    let status = reap(&mut child).await;

                    match end {
                        SessionEnd::Exited => {
                            tracing::info!(status = ?status, "Encoder exited, restarting");
                            State::Restarting
                        }
                        SessionEnd::Framing(FramingError::Io(e)) => {
                            tracing::warn!(error = %e, "Encoder read failed, restarting");
                            State::Restarting
                        }
                        SessionEnd::Framing(e) => {
                            SourceCounters::incr(&self.counters.framing_errors);
                            tracing::warn!(error = %e, "Encoder output is not a JPEG stream, restarting");
                            State::Restarting
                        }
                        SessionEnd::Idle(frame) => State::Paused(frame),
                        SessionEnd::Closed => State::Stopped,
                    }
                }
                State::Restarting => {
                    let delay = self.config.restart_delay;
                    if delay.is_zero() || self.wait(delay).await {
                        State::Spawning
                    } else {
                        State::Stopped
                    }
                }
                State::Paused(frame) => {
                    SourceCounters::incr(&self.counters.pauses);
                    tracing::info!(sequence = frame.sequence, "No demand, encoder paused");

                    // Guaranteed delivery: blocks until the distributor takes it
                    match self.tx.send(frame).await {
                        Ok(()) => {
                            tracing::info!("Demand returned, resuming encoder");
                            State::Spawning
                        }
                        Err(_) => State::Stopped,
                    }
                }
                State::Stopped => {
                    tracing::debug!("Frame channel closed, source stopped");
                    return;
                }
            };
        }
    }

    fn spawn(&mut self) -> Result<Child> {
        let mut cmd = self.config.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        SourceCounters::incr(&self.counters.spawns);
        tracing::info!(
            program = %self.config.program,
            pid = ?child.id(),
            policy = ?self.config.delivery,
            "Encoder started"
        );

        Ok(child)
    }

    async fn stream(&mut self, child: &mut Child) -> SessionEnd {
        let Some(stdout) = child.stdout.take() else {
            return SessionEnd::Exited;
        };
        let delimiter = JpegDelimiter::with_max_frame_size(self.config.max_frame_size);
        let mut payloads = FramedRead::new(stdout, delimiter);

        loop {
            let next = tokio::select! {
                _ = self.tx.closed() => return SessionEnd::Closed,
                next = payloads.next() => next,
            };

            let payload = match next {
                None => return SessionEnd::Exited,
                Some(Err(e)) => return SessionEnd::Framing(e),
                Some(Ok(payload)) => payload,
            };
            SourceCounters::incr(&self.counters.frames_delimited);

            let Some(frame) = self.decode(payload).await else {
                continue;
            };

            match self.tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    if self.config.delivery == DeliveryPolicy::PauseOnIdle && !self.has_demand() {
                        return SessionEnd::Idle(frame);
                    }
                    SourceCounters::incr(&self.counters.frames_dropped);
                    tracing::trace!(sequence = frame.sequence, "Output slot full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => return SessionEnd::Closed,
            }
        }
    }

    fn has_demand(&self) -> bool {
        *self.demand.borrow() > 0
    }

    async fn decode(&mut self, payload: Bytes) -> Option<DecodedFrame> {
        let size = payload.len();
        match tokio::task::spawn_blocking(move || jpeg::decode(&payload)).await {
            Ok(Ok(image)) => {
                self.sequence += 1;
                SourceCounters::incr(&self.counters.frames_decoded);
                Some(DecodedFrame {
                    sequence: self.sequence,
                    captured_at: Instant::now(),
                    image,
                })
            }
            Ok(Err(e)) => {
                // Expected right after start, before the encoder has a keyframe
                SourceCounters::incr(&self.counters.decode_errors);
                tracing::debug!(error = %e, bytes = size, "Discarding undecodable frame");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Decode task failed");
                None
            }
        }
    }

    /// Sleep unless the channel closes first; returns whether it is still open
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.tx.closed() => false,
        }
    }
}

/// Kill the child if it is still running and collect its exit status
async fn reap(child: &mut Child) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }
    let _ = child.start_kill();
    child.wait().await.ok()
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if !line.is_empty() {
            tracing::warn!(target: "ffmpeg", "{}", line);
        }
    }
}
