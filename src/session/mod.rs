//! Viewer sessions
//!
//! One session per HTTP viewer. It owns a subscription and turns the frames
//! arriving in its mailbox into a multipart body, enforcing the view-time
//! limit and the deny rule.

pub mod state;
pub mod writer;

pub use state::{SessionOutcome, SessionPhase, SessionState};
pub use writer::{ViewerSession, BOUNDARY, CONTENT_TYPE};
