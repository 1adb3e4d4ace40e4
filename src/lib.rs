//! Live MJPEG relay
//!
//! Pulls a camera stream through ffmpeg, cuts its output into JPEG frames and
//! fans them out to any number of HTTP viewers as
//! `multipart/x-mixed-replace`. Viewers need a token that changes every UTC
//! day, can be capped in view time, and can be shown a still instead of the
//! live picture while a deny rule is active.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mjpeg_relay::{source, AllowAll, Distributor, RelayServer, ServerConfig, SourceConfig, ViewerPolicy};
//!
//! #[tokio::main]
//! async fn main() -> mjpeg_relay::Result<()> {
//!     let policy: Arc<dyn ViewerPolicy> = Arc::new(AllowAll);
//!     let frames = source::open(SourceConfig::ffmpeg("rtsp://camera/stream", "scale=800:600"))?;
//!
//!     let distributor = Distributor::new(Arc::clone(&policy));
//!     distributor.spawn(frames);
//!
//!     RelayServer::new(ServerConfig::default(), distributor, policy).run().await
//! }
//! ```

pub mod error;
pub mod media;
pub mod registry;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;

pub use error::{Error, Result};
pub use media::StillImage;
pub use registry::{Distributor, EncodedFrame, RegistryConfig, RegistryError, Subscription};
pub use server::{
    Access, AllowAll, AntiIndexer, LocalPolicy, RelayServer, ServerConfig, ViewConfig,
    ViewerPolicy,
};
pub use session::{SessionOutcome, ViewerSession};
pub use source::{DecodedFrame, DeliveryPolicy, FrameChannel, SourceConfig};
pub use stats::{DistributorStats, SourceStats};
