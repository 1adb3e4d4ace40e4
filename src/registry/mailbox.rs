//! Single-slot mailbox between the distributor and one consumer
//!
//! Offering never blocks and never queues: a frame the consumer has not read
//! yet is replaced by the newer one. Slow viewers therefore see gaps, never
//! lag.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::frame::EncodedFrame;

#[derive(Debug, Default)]
struct Slot {
    frame: Option<EncodedFrame>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a connected sender/receiver pair
pub(crate) fn mailbox() -> (MailboxSender, Mailbox) {
    let shared = Arc::new(Shared::default());
    (
        MailboxSender {
            shared: Arc::clone(&shared),
        },
        Mailbox { shared },
    )
}

/// Distributor side of a mailbox
#[derive(Debug)]
pub(crate) struct MailboxSender {
    shared: Arc<Shared>,
}

impl MailboxSender {
    /// Put a frame in the slot without waiting
    ///
    /// Returns `true` if an unread frame was replaced. Offers to a closed
    /// mailbox are discarded.
    pub fn offer(&self, frame: EncodedFrame) -> bool {
        let replaced = {
            let mut slot = self.shared.slot();
            if slot.closed {
                return false;
            }
            slot.frame.replace(frame).is_some()
        };
        self.shared.notify.notify_one();
        replaced
    }

    /// Discard any unread frame and wake the consumer with end-of-stream
    pub fn close(&self) {
        {
            let mut slot = self.shared.slot();
            slot.closed = true;
            slot.frame = None;
        }
        self.shared.notify.notify_one();
    }
}

impl Drop for MailboxSender {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer side of a mailbox
#[derive(Debug)]
pub struct Mailbox {
    shared: Arc<Shared>,
}

impl Mailbox {
    /// Wait for the next frame; `None` once the mailbox is closed
    pub async fn recv(&mut self) -> Option<EncodedFrame> {
        loop {
            {
                let mut slot = self.shared.slot();
                if let Some(frame) = slot.frame.take() {
                    return Some(frame);
                }
                if slot.closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Take the pending frame, if any, without waiting
    pub fn try_recv(&mut self) -> Option<EncodedFrame> {
        self.shared.slot().frame.take()
    }

    /// Whether the distributor has closed this mailbox
    pub fn is_closed(&self) -> bool {
        self.shared.slot().closed
    }
}
