//! Builder pattern for [`Engine`].

use crate::engine::DeviceId;
use crate::notify::{notification_callback, NotificationQueue};
use crate::{Engine, EngineConfig, EngineNotification, NotificationCallback};

/// Builder for configuring an [`Engine`].
///
/// Use [`Engine::builder()`] to create a new builder.
///
/// # Example
///
/// ```
/// use appmix::Engine;
///
/// let engine = Engine::builder(1)
///     .control_app_bundle_id("com.example.mixerapp")
///     .on_notification(|n| tracing::debug!(?n, "engine notification"))
///     .build();
/// ```
pub struct EngineBuilder {
    device_id: DeviceId,
    config: EngineConfig,
    callback: Option<NotificationCallback>,
}

impl EngineBuilder {
    pub(crate) fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            config: EngineConfig::default(),
            callback: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the bundle id that identifies the control app.
    pub fn control_app_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.config.control_app_bundle_id = bundle_id.into();
        self
    }

    /// Sets the per-client routing ring capacity in frames (power of two).
    pub fn routing_buffer_frames(mut self, frames: usize) -> Self {
        self.config.routing_buffer_frames = frames;
        self
    }

    /// Registers a callback for device running-state notifications.
    ///
    /// The callback runs on a dedicated serial thread, in the order the
    /// triggering control operations ran.
    pub fn on_notification<F>(mut self, callback: F) -> Self
    where
        F: Fn(EngineNotification) + Send + Sync + 'static,
    {
        self.callback = Some(notification_callback(callback));
        self
    }

    /// Builds the engine.
    pub fn build(self) -> Engine {
        let notifications = match self.callback {
            Some(callback) => NotificationQueue::spawn(callback),
            None => NotificationQueue::disabled(),
        };
        Engine::with_parts(self.device_id, self.config, notifications)
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("device_id", &self.device_id)
            .field("config", &self.config)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let engine = Engine::builder(7).build();
        assert_eq!(engine.device_id(), 7);
    }

    #[test]
    fn test_builder_invalid_ring_capacity_falls_back() {
        let engine = Engine::builder(1).routing_buffer_frames(1000).build();
        // The engine still works; the capacity was replaced by the default.
        assert!(engine.set_route(100, 200, 1.0, true));
    }
}
