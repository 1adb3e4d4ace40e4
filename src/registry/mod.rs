//! Broadcast distributor for live frames
//!
//! The distributor is the single reader of a frame source. It encodes every
//! frame once and offers the shared `Bytes` buffer to each registered
//! consumer's single-slot mailbox.
//!
//! # Architecture
//!
//! ```text
//!                            Distributor (Arc)
//!                     ┌───────────────────────────┐
//!                     │ Mutex<ConsumerSet {       │
//!                     │   next_id,                │
//!                     │   HashMap<Id, Mailbox tx> │
//!                     │ }>                        │
//!                     └─────────────┬─────────────┘
//!                                   │
//!         ┌─────────────────────────┼─────────────────────────┐
//!         │                         │                         │
//!         ▼                         ▼                         ▼
//!   [FrameChannel]            [Subscription]            [Subscription]
//!    frames.recv()            mailbox.recv()            mailbox.recv()
//!         │                         │                         │
//!         └──► encode ──► broadcast()──► ViewerSession ──► HTTP body
//! ```
//!
//! # Slow consumers
//!
//! Offering a frame never waits. If a consumer has not taken the previous
//! frame yet, it is replaced, so a slow viewer skips frames instead of
//! falling behind or stalling the others.

pub mod config;
pub mod error;
pub mod frame;
pub mod mailbox;
pub mod store;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use frame::{ConsumerId, EncodedFrame};
pub use mailbox::Mailbox;
pub use store::{Distributor, Subscription};
