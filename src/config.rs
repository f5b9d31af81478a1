//! Engine configuration.

/// Default capacity of each per-client routing ring, in stereo frames.
///
/// Sized far above any realistic routing lag (one RT block, typically
/// 128–1024 frames) so overwrites never land inside the window a consumer
/// reads from.
pub const DEFAULT_ROUTING_BUFFER_FRAMES: usize = 8192;

/// Configuration for the mixing engine.
///
/// Use [`EngineConfig::default()`] for sensible defaults, or customize as
/// needed.
///
/// # Example
///
/// ```
/// use appmix::EngineConfig;
///
/// let config = EngineConfig {
///     control_app_bundle_id: "com.example.mixerapp".into(),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bundle id identifying the privileged control application.
    ///
    /// Clients attaching with this bundle id are excluded from the
    /// "running somewhere other than the control app" counter.
    pub control_app_bundle_id: String,

    /// Capacity of each per-client routing ring buffer, in stereo frames.
    ///
    /// Must be a power of two and larger than the biggest RT block the host
    /// will deliver. Default: 8192.
    pub routing_buffer_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            control_app_bundle_id: "com.appmix.controller".to_string(),
            routing_buffer_frames: DEFAULT_ROUTING_BUFFER_FRAMES,
        }
    }
}

impl EngineConfig {
    /// Returns true if the ring capacity is a usable power of two.
    pub(crate) fn ring_capacity_valid(&self) -> bool {
        self.routing_buffer_frames > 0 && self.routing_buffer_frames.is_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.routing_buffer_frames, DEFAULT_ROUTING_BUFFER_FRAMES);
        assert_eq!(config.control_app_bundle_id, "com.appmix.controller");
        assert!(config.ring_capacity_valid());
    }

    #[test]
    fn test_ring_capacity_validation() {
        let mut config = EngineConfig::default();
        config.routing_buffer_frames = 1000;
        assert!(!config.ring_capacity_valid());
        config.routing_buffer_frames = 0;
        assert!(!config.ring_capacity_valid());
        config.routing_buffer_frames = 4096;
        assert!(config.ring_capacity_valid());
    }
}
