//! HTTP serving: the stream endpoint, its token gate and viewer policy hooks

pub mod config;
pub mod gate;
pub mod handler;
pub mod listener;

pub use config::{ServerConfig, ViewConfig};
pub use gate::AntiIndexer;
pub use handler::{Access, AllowAll, LocalPolicy, ViewerPolicy};
pub use listener::RelayServer;
