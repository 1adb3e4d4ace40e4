//! Distributor configuration

use crate::media::jpeg::DEFAULT_QUALITY;

/// Configuration for the broadcast distributor
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// JPEG quality used when re-encoding live frames (1-100)
    pub quality: u8,

    /// Stop pulling from the source while no consumer is registered
    ///
    /// Pair with `DeliveryPolicy::PauseOnIdle` so the source can tell that
    /// nobody is watching.
    pub pause_when_idle: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            pause_when_idle: false,
        }
    }
}

impl RegistryConfig {
    /// Set the live-frame JPEG quality
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Enable or disable idle pausing
    pub fn pause_when_idle(mut self, enabled: bool) -> Self {
        self.pause_when_idle = enabled;
        self
    }
}
