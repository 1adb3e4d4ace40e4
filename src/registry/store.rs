//! Broadcast distributor implementation
//!
//! The distributor is the only reader of a frame source. It encodes each
//! frame once and offers the shared buffer to every registered consumer.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::server::handler::ViewerPolicy;
use crate::source::{DecodedFrame, FrameChannel};
use crate::stats::{DistributorCounters, DistributorStats};

use super::config::RegistryConfig;
use super::error::RegistryError;
use super::frame::{ConsumerId, EncodedFrame};
use super::mailbox::{mailbox, Mailbox, MailboxSender};

/// Consumer set plus the identifier counter, guarded together
#[derive(Debug, Default)]
struct ConsumerSet {
    next_id: ConsumerId,
    consumers: HashMap<ConsumerId, MailboxSender>,
    closed: bool,
}

struct Inner {
    consumers: Mutex<ConsumerSet>,
    policy: Arc<dyn ViewerPolicy>,
    config: RegistryConfig,
    counters: DistributorCounters,
    viewers: watch::Sender<usize>,
}

/// Fan-out hub between one frame source and many viewers
///
/// Cheap to clone; all clones share the same consumer set. The set lives
/// behind a `std::sync::Mutex` that is never held across an `.await`.
#[derive(Clone)]
pub struct Distributor {
    inner: Arc<Inner>,
}

impl Distributor {
    /// Create a distributor with default configuration
    pub fn new(policy: Arc<dyn ViewerPolicy>) -> Self {
        Self::with_config(RegistryConfig::default(), policy)
    }

    /// Create a distributor with custom configuration
    pub fn with_config(config: RegistryConfig, policy: Arc<dyn ViewerPolicy>) -> Self {
        let (viewers, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                consumers: Mutex::new(ConsumerSet::default()),
                policy,
                config,
                counters: DistributorCounters::new(),
                viewers,
            }),
        }
    }

    /// Get the distributor configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn consumers(&self) -> MutexGuard<'_, ConsumerSet> {
        self.inner
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new consumer
    ///
    /// The viewer policy sees the would-be total first and may refuse it, in
    /// which case nothing is added.
    pub fn register(&self) -> Result<Subscription, RegistryError> {
        let (id, mailbox, total) = {
            let mut set = self.consumers();
            if set.closed {
                return Err(RegistryError::Closed);
            }

            let id = set.next_id;
            set.next_id += 1;
            let total = set.consumers.len() + 1;

            if let Err(reason) = self.inner.policy.viewer_count_changed(total) {
                DistributorCounters::incr(&self.inner.counters.viewers_rejected);
                tracing::info!(consumer_id = id, reason = %reason, "Viewer rejected");
                return Err(RegistryError::ViewerRejected(reason));
            }

            let (tx, rx) = mailbox();
            set.consumers.insert(id, tx);
            self.inner.viewers.send_replace(total);
            (id, rx, total)
        };

        tracing::info!(consumer_id = id, viewers = total, "Viewer registered");

        Ok(Subscription {
            id,
            mailbox,
            distributor: self.clone(),
        })
    }

    /// Remove a consumer
    ///
    /// Its mailbox is closed and emptied before the lock is released, so no
    /// frame reaches it afterwards. Unknown identifiers are ignored.
    pub fn unregister(&self, id: ConsumerId) {
        let total = {
            let mut set = self.consumers();
            let Some(tx) = set.consumers.remove(&id) else {
                return;
            };
            tx.close();
            let total = set.consumers.len();

            if let Err(reason) = self.inner.policy.viewer_count_changed(total) {
                tracing::warn!(consumer_id = id, reason = %reason, "Viewer count callback failed");
            }
            self.inner.viewers.send_replace(total);
            total
        };

        tracing::info!(consumer_id = id, viewers = total, "Viewer unregistered");
    }

    /// Offer a frame to every consumer without waiting
    ///
    /// Returns the number of consumers offered the frame.
    pub fn broadcast(&self, frame: EncodedFrame) -> usize {
        let set = self.consumers();
        let counters = &self.inner.counters;

        for tx in set.consumers.values() {
            DistributorCounters::incr(&counters.frames_delivered);
            if tx.offer(frame.clone()) {
                DistributorCounters::incr(&counters.frames_overwritten);
            }
        }

        set.consumers.len()
    }

    /// Number of registered consumers
    pub fn viewer_count(&self) -> usize {
        *self.inner.viewers.borrow()
    }

    /// Watch the viewer count
    pub fn watch_viewers(&self) -> watch::Receiver<usize> {
        self.inner.viewers.subscribe()
    }

    /// Whether the source has ended and no more frames will arrive
    pub fn is_closed(&self) -> bool {
        self.consumers().closed
    }

    /// Snapshot distributor statistics
    pub fn stats(&self) -> DistributorStats {
        self.inner.counters.snapshot(self.viewer_count())
    }

    /// Consume a frame source until it ends
    ///
    /// Each frame is encoded on the blocking pool and broadcast. The viewer
    /// count is reported to the source as its demand. When the source ends
    /// all mailboxes are closed and further registrations fail.
    pub async fn run(&self, mut frames: FrameChannel) {
        let mut viewers = self.watch_viewers();

        loop {
            let count = *viewers.borrow_and_update();
            frames.set_demand(count);

            if count == 0 && self.inner.config.pause_when_idle {
                // Stop pulling so the source sees its slot stay full
                if viewers.changed().await.is_err() {
                    break;
                }
                continue;
            }

            let frame = tokio::select! {
                frame = frames.recv() => frame,
                changed = viewers.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let Some(frame) = frame else {
                break;
            };

            if self.viewer_count() == 0 {
                tracing::trace!(sequence = frame.sequence, "No viewers, frame discarded");
                continue;
            }

            if let Some(encoded) = self.encode(frame).await {
                self.broadcast(encoded);
            }
        }

        self.close();
    }

    /// Run the consume loop on its own task
    pub fn spawn(&self, frames: FrameChannel) -> JoinHandle<()> {
        let distributor = self.clone();
        tokio::spawn(async move { distributor.run(frames).await })
    }

    async fn encode(&self, frame: DecodedFrame) -> Option<EncodedFrame> {
        let quality = self.inner.config.quality;
        let sequence = frame.sequence;
        let counters = &self.inner.counters;

        match tokio::task::spawn_blocking(move || EncodedFrame::encode(&frame, quality)).await {
            Ok(Ok(encoded)) => {
                DistributorCounters::incr(&counters.frames_encoded);
                Some(encoded)
            }
            Ok(Err(e)) => {
                DistributorCounters::incr(&counters.encode_errors);
                tracing::debug!(sequence = sequence, error = %e, "Frame encode failed");
                None
            }
            Err(e) => {
                DistributorCounters::incr(&counters.encode_errors);
                tracing::warn!(sequence = sequence, error = %e, "Encode task failed");
                None
            }
        }
    }

    fn close(&self) {
        let drained = {
            let mut set = self.consumers();
            set.closed = true;
            let drained = set.consumers.len();
            for (_, tx) in set.consumers.drain() {
                tx.close();
            }
            if drained > 0 {
                if let Err(reason) = self.inner.policy.viewer_count_changed(0) {
                    tracing::warn!(reason = %reason, "Viewer count callback failed");
                }
            }
            self.inner.viewers.send_replace(0);
            drained
        };

        tracing::info!(
            viewers = drained,
            frames = self.inner.counters.frames_encoded.load(Ordering::Relaxed),
            "Frame source ended, distributor closed"
        );
    }
}

/// A registered consumer
///
/// Unregisters on drop, so every exit path of a viewer session tears down.
pub struct Subscription {
    id: ConsumerId,
    mailbox: Mailbox,
    distributor: Distributor,
}

impl Subscription {
    /// Consumer identifier
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Wait for the next frame; `None` once unregistered or the source ended
    pub async fn recv(&mut self) -> Option<EncodedFrame> {
        self.mailbox.recv().await
    }

    /// Take the pending frame, if any
    pub fn try_recv(&mut self) -> Option<EncodedFrame> {
        self.mailbox.try_recv()
    }

    /// Unregister now instead of at drop
    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.distributor.unregister(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
