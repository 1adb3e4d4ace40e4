//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::media::StillImage;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// Per-viewer streaming options
#[derive(Debug, Clone, Default)]
pub struct ViewConfig {
    /// Maximum view time per connection (None = unlimited)
    pub limit: Option<Duration>,

    /// Still sent once when the limit is reached
    pub after_limit: Option<StillImage>,
}

impl ViewConfig {
    /// Set the view-time limit; zero means unlimited
    pub fn limit(mut self, limit: Duration) -> Self {
        self.limit = if limit.is_zero() { None } else { Some(limit) };
        self
    }

    /// Set the placeholder sent when the limit is reached
    pub fn after_limit(mut self, image: StillImage) -> Self {
        self.after_limit = Some(image);
        self
    }
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent stream connections (0 = unlimited)
    pub max_connections: usize,

    /// Per-viewer options
    pub view: ViewConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            view: ViewConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum concurrent stream connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set per-viewer options
    pub fn view(mut self, view: ViewConfig) -> Self {
        self.view = view;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::jpeg::tests::test_card;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_connections, 0);
        assert!(config.view.limit.is_none());
        assert!(config.view.after_limit.is_none());
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let config = ServerConfig::with_addr(addr).max_connections(8);

        assert_eq!(config.bind_addr.port(), 9090);
        assert_eq!(config.max_connections, 8);
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let view = ViewConfig::default().limit(Duration::ZERO);
        assert!(view.limit.is_none());

        let view = ViewConfig::default().limit(Duration::from_secs(30));
        assert_eq!(view.limit, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_after_limit() {
        let still = StillImage::from_image(&test_card(8, 8)).unwrap();
        let config = ServerConfig::default().view(ViewConfig::default().after_limit(still.clone()));

        assert_eq!(config.view.after_limit, Some(still));
    }
}
