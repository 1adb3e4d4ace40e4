//! Viewer policy hooks
//!
//! The relay core knows nothing about where deny rules or viewer limits come
//! from. Implement [`ViewerPolicy`] to plug in a pub/sub client, a database,
//! or anything else; pass it to the distributor and the stream handler at
//! construction time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::media::StillImage;

/// Result of a viewing-allowed check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Forward live frames
    Allowed,
    /// Suppress live frames, optionally showing a still instead
    Denied(Option<StillImage>),
}

/// Capability interface consumed by the distributor and the stream writer
///
/// Both methods are called on hot paths and, for `viewer_count_changed`,
/// while the distributor's consumer lock is held. Implementations must not
/// block.
pub trait ViewerPolicy: Send + Sync + 'static {
    /// Called whenever the number of registered viewers changes
    ///
    /// Returning an error while a viewer is being added rejects that viewer.
    /// Errors returned while a viewer is being removed are only logged.
    fn viewer_count_changed(&self, count: usize) -> Result<(), String> {
        let _ = count;
        Ok(())
    }

    /// Called for every frame before it is written to a viewer
    fn viewing_allowed(&self) -> Access {
        Access::Allowed
    }
}

/// Policy that accepts every viewer and never denies
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ViewerPolicy for AllowAll {}

/// In-process policy: optional viewer cap plus a switchable deny rule
///
/// Stands in for an external rule engine. The deny flag can be flipped at
/// runtime from any task.
#[derive(Debug, Default)]
pub struct LocalPolicy {
    max_viewers: Option<usize>,
    denied: AtomicBool,
    deny_image: Mutex<Option<StillImage>>,
    viewers: AtomicUsize,
}

impl LocalPolicy {
    /// Create a policy with no cap and viewing allowed
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject registrations beyond `max` concurrent viewers
    pub fn max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = Some(max);
        self
    }

    /// Still shown while viewing is denied
    pub fn deny_image(self, image: StillImage) -> Self {
        *self
            .deny_image
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(image);
        self
    }

    /// Turn the deny rule on or off
    pub fn set_denied(&self, denied: bool) {
        self.denied.store(denied, Ordering::Relaxed);
        tracing::info!(denied = denied, "Viewing rule changed");
    }

    /// Whether the deny rule is active
    pub fn is_denied(&self) -> bool {
        self.denied.load(Ordering::Relaxed)
    }

    /// Last viewer count reported by the distributor
    pub fn viewers(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }
}

impl ViewerPolicy for LocalPolicy {
    fn viewer_count_changed(&self, count: usize) -> Result<(), String> {
        if let Some(max) = self.max_viewers {
            if count > max {
                return Err(format!("viewer limit of {} reached", max));
            }
        }
        self.viewers.store(count, Ordering::Relaxed);
        Ok(())
    }

    fn viewing_allowed(&self) -> Access {
        if self.is_denied() {
            let image = self
                .deny_image
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            Access::Denied(image)
        } else {
            Access::Allowed
        }
    }
}
