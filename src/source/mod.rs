//! Frame source: the external encoder process and its decoded output
//!
//! ```text
//!   ffmpeg stdout ──► JpegDelimiter ──► decode ──► [slot: 1] ──► Distributor
//!        ▲                                             │
//!        └──────────── supervisor (restart / pause) ◄──┘ full?
//! ```
//!
//! The source spawns the encoder, cuts its output into JPEG payloads, decodes
//! each one and offers it to a single-slot channel. Whatever ends the
//! process (crash, kill, EOF, garbage output), the supervisor starts it again.

pub mod capture;
pub mod config;
pub mod frame;
pub mod supervisor;

pub use capture::capture;
pub use config::{DeliveryPolicy, SourceConfig};
pub use frame::DecodedFrame;
pub use supervisor::{open, FrameChannel, SourceMonitor};
